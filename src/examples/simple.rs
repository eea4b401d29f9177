//! Simple example of using reqwest-proxy-dispatch.

use reqwest_middleware::ClientBuilder;
use reqwest_proxy_dispatch::{
    CandidateSource, ListSource, ProxyClient, ProxyPoolConfig, ProxyType, RotatingSource,
};
use std::sync::Arc;
use std::time::Duration;

const SOCKS5_LIST: &str =
    "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/socks5/data.txt";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Starting proxy pool...");

    // free proxy lists, bare `ip:port` per line
    let sources: Vec<Arc<dyn CandidateSource>> = vec![
        Arc::new(ListSource::new(SOCKS5_LIST).with_default_kind(ProxyType::Socks5)),
        Arc::new(ListSource::new(
            "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
        )),
    ];

    let config = ProxyPoolConfig::builder()
        .pool_size(10)
        .max_retries(3)
        .validation_workers(50)
        .health_check_timeout(Duration::from_secs(5))
        .health_check_url("https://httpbin.org/ip")
        .good_codes([200])
        .build();

    let proxy_client = ProxyClient::new(config, Arc::new(RotatingSource::new(sources)));

    // give the first refresh a moment, requests fall back to a direct connection meanwhile
    tokio::time::sleep(Duration::from_secs(20)).await;
    println!("Pool: {:?}", proxy_client.stats());

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(proxy_client.middleware())
        .build();

    println!("Sending request...");
    let response = client.get("https://httpbin.org/ip").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);

    proxy_client.close().await;
    Ok(())
}
