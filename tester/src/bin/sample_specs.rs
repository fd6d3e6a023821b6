//! Sample spec assembly executable
//!
//! `sample-specs --list-specs` prints the discovery report; any other
//! invocation runs one node of one spec as the runner directs.

#[tokio::main]
async fn main() {
    let code = node::run_host(tester::specs::registry()).await;
    std::process::exit(code);
}
