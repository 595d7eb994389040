use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use http::{header, Request, Response};

/// Generic HTTP client.
///
/// A trait is used here so that the ledger and schema adapters can run on any transport, and so
/// that they can be tested without a network.
#[async_trait]
pub trait AsyncHttpClient: Send + Sync {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;
}

pub(crate) fn base_request() -> http::request::Builder {
    Request::builder().header(header::ACCEPT, "application/json")
}

/// Execute `request` and return the body of a successful response.
pub(crate) async fn fetch<C: AsyncHttpClient + ?Sized>(
    client: &C,
    request: Request<Vec<u8>>,
) -> Result<Vec<u8>> {
    let uri = request.uri().clone();
    let response = client
        .execute(request)
        .await
        .context(format!("request to {uri} failed"))?;

    let status = response.status();
    if !status.is_success() {
        let body = String::from_utf8_lossy(response.body());
        bail!("request to {uri} was unsuccessful (status: {status}): {body}")
    }
    Ok(response.into_body())
}

#[derive(Debug)]
pub struct ReqwestClient(reqwest::Client);

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("unable to build http_client")
            .map(Self)
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let response = self
            .0
            .execute(request.try_into().context("unable to convert request")?)
            .await
            .context("http request failed")?;

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());

        builder
            .headers_mut()
            .context("unable to set headers")?
            .extend(response.headers().clone());

        builder
            .body(
                response
                    .bytes()
                    .await
                    .context("failed to extract response body")?
                    .to_vec(),
            )
            .context("unable to construct response")
    }
}
