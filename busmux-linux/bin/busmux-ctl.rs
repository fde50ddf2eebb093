#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    busmux_linux::ctl_main().await
}
