mod app;
mod facebook;
mod knowledge;
mod prompting;
mod responder;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
