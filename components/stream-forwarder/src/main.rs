use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match stream_forwarder::cli::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stream-forwarder: {e:#}");
            ExitCode::FAILURE
        }
    }
}
