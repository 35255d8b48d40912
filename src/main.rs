use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dvd_dumper_lib::run().await
}
