#[tokio::main]
async fn main() {
    if let Err(e) = unishare::server::run().await {
        unishare::ulog!("unishare-server: {}", e);
        std::process::exit(1);
    }
}
