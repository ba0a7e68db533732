use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::auth::{NetworkCredential, downgrade_to_http};
use crate::error::RemoteError;

pub const SOAP_NAMESPACE: &str = "http://schemas.microsoft.com/sharepoint/soap/";
pub const ADMIN_SERVICE_PATH: &str = "/_vti_adm/Admin.asmx";
const SOAP_CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteCollectionCreation {
    pub url: String,
    pub title: String,
    pub description: String,
    pub owner_login: String,
    pub lcid: String,
    pub web_template: String,
}

/// Site-collection lifecycle through the legacy admin web service.
pub trait AdminApi {
    /// Returns the raw response body.
    fn create_site_collection(&self, info: &SiteCollectionCreation) -> Result<String>;
    /// Returns the raw response body.
    fn delete_site_collection(&self, url: &str) -> Result<String>;
}

/// Escape the five XML special characters.
pub(crate) fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">
  <soap:Body>
{body}
  </soap:Body>
</soap:Envelope>"#
    )
}

/// `CreateSite` request. The owner login doubles as the owner name; email and
/// portal fields are sent empty.
pub fn create_site_envelope(info: &SiteCollectionCreation) -> String {
    let owner = xml_escape(&info.owner_login);
    envelope(&format!(
        r#"    <CreateSite xmlns="{SOAP_NAMESPACE}">
      <Url>{url}</Url>
      <Title>{title}</Title>
      <Description>{description}</Description>
      <Lcid>{lcid}</Lcid>
      <WebTemplate>{web_template}</WebTemplate>
      <OwnerLogin>{owner}</OwnerLogin>
      <OwnerName>{owner}</OwnerName>
      <OwnerEmail/>
      <PortalUrl/>
      <PortalName/>
    </CreateSite>"#,
        url = xml_escape(&downgrade_to_http(&info.url)),
        title = xml_escape(&info.title),
        description = xml_escape(&info.description),
        lcid = xml_escape(&info.lcid),
        web_template = xml_escape(&info.web_template),
    ))
}

pub fn delete_site_envelope(url: &str) -> String {
    envelope(&format!(
        r#"    <DeleteSite xmlns="{SOAP_NAMESPACE}">
      <Url>{url}</Url>
    </DeleteSite>"#,
        url = xml_escape(&downgrade_to_http(url)),
    ))
}

fn is_soap_fault(body: &str) -> bool {
    body.contains(":Fault>") || body.contains("<Fault>")
}

/// Admin service base: the web application host over plain HTTP on the
/// admin port.
pub fn admin_base_url(web_application_url: &str, port: u16) -> Result<Url> {
    let mut url = Url::parse(&downgrade_to_http(web_application_url.trim()))
        .with_context(|| format!("invalid web application URL: {web_application_url}"))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        anyhow::bail!("web application URL has no host: {web_application_url}");
    }
    url.set_port(Some(port))
        .map_err(|_| anyhow::anyhow!("cannot set admin port {port} on {web_application_url}"))?;
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct AdminClientConfig {
    pub base_url: Url,
    pub credential: NetworkCredential,
    pub user_agent: String,
    pub timeout: Option<Duration>,
}

pub struct AdminClient {
    client: Client,
    endpoint: Url,
    credential: NetworkCredential,
}

impl AdminClient {
    pub fn new(config: AdminClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .context("failed to build admin service HTTP client")?;
        let endpoint = config
            .base_url
            .join(ADMIN_SERVICE_PATH)
            .context("failed to build admin service URL")?;
        Ok(Self {
            client,
            endpoint,
            credential: config.credential,
        })
    }

    fn call(&self, operation: &str, envelope: String) -> Result<String> {
        debug!(operation, endpoint = %self.endpoint, "sending admin request");
        // The admin service authenticates the bare username.
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("SOAPAction", format!("{SOAP_NAMESPACE}{operation}"))
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .basic_auth(&self.credential.username, Some(&self.credential.password))
            .body(envelope)
            .send()
            .with_context(|| format!("failed to call admin service {operation}"))?;

        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("failed to read admin service {operation} response"))?;
        if !status.is_success() {
            return Err(RemoteError::Transport {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }
        if is_soap_fault(&body) {
            return Err(RemoteError::SoapFault {
                operation: operation.to_string(),
                body,
            }
            .into());
        }
        Ok(body)
    }
}

impl AdminApi for AdminClient {
    fn create_site_collection(&self, info: &SiteCollectionCreation) -> Result<String> {
        let body = self.call("CreateSite", create_site_envelope(info))?;
        info!(url = %info.url, "admin service created site collection");
        Ok(body)
    }

    fn delete_site_collection(&self, url: &str) -> Result<String> {
        let body = self.call("DeleteSite", delete_site_envelope(url))?;
        info!(url, "admin service deleted site collection");
        Ok(body)
    }
}
