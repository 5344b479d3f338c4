use std::net::IpAddr;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, Uri};
use axum::response::Response;
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioExecutor};
use reqwest::Url;
use rustls::ClientConfig;

use crate::X_FORWARDED_FOR;

const VIA_IDENTIFIER: &str = "1.1 blockgate";

const HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

type Client = hyper_util::client::legacy::Client<HttpsConnector<HttpConnector>, Body>;

/// Forwards accepted requests to the single configured upstream.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    url: Url,
}

impl UpstreamClient {
    pub fn new(url: Url) -> Self {
        let tls_config = ClientConfig::builder()
            .with_webpki_roots()
            .with_no_client_auth();

        let connector = HttpsConnector::<HttpConnector>::builder()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_all_versions()
            .build();

        let client = hyper_util::client::legacy::Client::<(), ()>::builder(TokioExecutor::new())
            .build(connector);

        Self { client, url }
    }

    /// Rewrites the request onto the upstream base, keeping path and query,
    /// and relays the response.
    pub async fn forward(&self, mut request: Request, client_ip: IpAddr) -> anyhow::Result<Response> {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = format!("{}{}", self.url.as_str().trim_end_matches('/'), path_and_query);

        let forwarded_for = match request.headers().get(&X_FORWARDED_FOR) {
            Some(prior) => HeaderValue::from_str(&format!(
                "{}, {}",
                prior.to_str().unwrap_or_default(),
                client_ip
            ))?,
            None => HeaderValue::from_str(&client_ip.to_string())?,
        };

        let headers = request.headers_mut();
        for name in &HOP_BY_HOP_HEADERS {
            headers.remove(name);
        }
        headers.insert(X_FORWARDED_FOR, forwarded_for);
        headers.append(header::VIA, HeaderValue::from_static(VIA_IDENTIFIER));

        *request.uri_mut() = Uri::try_from(target)?;

        let response = self.client.request(request).await?;
        let mut response = response.map(Body::new);
        for name in &HOP_BY_HOP_HEADERS {
            response.headers_mut().remove(name);
        }
        Ok(response)
    }
}
