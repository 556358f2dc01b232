#[tokio::main]
async fn main() -> anyhow::Result<()> {
    billtrack_lib::run().await
}
