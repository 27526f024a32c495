/// Entry point for the Stackscout container inventory and exporter service.
///
/// Reads its configuration from the environment, connects to the Docker engine socket and
/// serves the HTTP API.
///
/// # Examples
///
/// ```bash
/// DOCKER_SOCKET=/var/run/docker.sock STACKSCOUT_LISTEN_ADDR=127.0.0.1:8081 cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    stackscout::run().await
}
