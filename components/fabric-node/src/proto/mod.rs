pub mod fabric {
    tonic::include_proto!("fabric");
}
