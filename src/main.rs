#[tokio::main]
async fn main() -> anyhow::Result<()> {
    weighdesk_lib::run().await
}
