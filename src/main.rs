#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dataflow_dashboard::run().await
}
