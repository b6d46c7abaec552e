#[tokio::main]
async fn main() {
    if let Err(e) = medcascade_lib::run().await {
        eprintln!("medcascade: {e}");
        std::process::exit(1);
    }
}
