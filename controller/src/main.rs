mod host;
mod serial;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
