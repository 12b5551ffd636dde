//! OAI-PMH `ListRecords` protocol client.
//!
//! This module drives paginated record harvesting against an OAI-PMH
//! endpoint:
//! - [`OaiClient`] - HTTP client issuing `ListRecords` requests
//! - [`RecordPage`] - One page of records plus the resumption token
//! - [`OaiRecord`] - Harvest-relevant view of one record
//! - [`OaiError`] - Transport, protocol, and envelope errors
//!
//! Only the fields the harvester consumes are modeled: the header
//! identifier, datestamp, and deleted flag, and the Dublin Core `date`
//! values from the metadata payload.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Connect timeout for OAI requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for OAI requests. `ListRecords` pages can be large.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors that can occur while streaming OAI-PMH records.
#[derive(Debug, Error)]
pub enum OaiError {
    /// Network-level failure reaching the endpoint.
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The request URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status} from OAI endpoint {url}")]
    HttpStatus {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The endpoint returned an OAI-PMH `<error>` element.
    #[error("OAI protocol error ({code}): {message}")]
    Protocol {
        /// OAI error code (e.g. `badArgument`, `noRecordsMatch`).
        code: String,
        /// Human-readable error text from the envelope.
        message: String,
    },

    /// The response body was not a parseable `ListRecords` envelope.
    #[error("malformed OAI response from {url}: {detail}")]
    MalformedResponse {
        /// The request URL.
        url: String,
        /// What was wrong with the body.
        detail: String,
    },
}

/// Harvest-relevant view of one OAI record.
#[derive(Debug, Clone)]
pub struct OaiRecord {
    /// Raw header identifier (may still carry a `doi:`/`hdl:`/`ark:/`
    /// prefix; may be empty).
    pub identifier: String,
    /// Header datestamp, verbatim.
    pub datestamp: Option<String>,
    /// Whether the header carries `status="deleted"`.
    pub deleted: bool,
    /// Dublin Core `date` values from the metadata payload, in document
    /// order.
    pub dates: Vec<String>,
}

impl OaiRecord {
    /// Returns the first metadata date value, when any is present.
    #[must_use]
    pub fn first_date(&self) -> Option<&str> {
        self.dates.first().map(String::as_str)
    }
}

/// One page of a `ListRecords` stream.
#[derive(Debug, Clone)]
pub struct RecordPage {
    /// Records on this page.
    pub records: Vec<OaiRecord>,
    /// Resumption token for the next page; `None` on the last page.
    pub resumption_token: Option<String>,
}

// ==================== OAI-PMH envelope (XML) ====================

#[derive(Debug, Deserialize)]
struct EnvelopeXml {
    #[serde(rename = "error")]
    error: Option<ProtocolErrorXml>,
    #[serde(rename = "ListRecords")]
    list_records: Option<ListRecordsXml>,
}

#[derive(Debug, Deserialize)]
struct ProtocolErrorXml {
    #[serde(rename = "@code")]
    code: Option<String>,
    #[serde(rename = "$text")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListRecordsXml {
    #[serde(rename = "record", default)]
    records: Vec<RecordXml>,
    #[serde(rename = "resumptionToken")]
    resumption_token: Option<TokenXml>,
}

#[derive(Debug, Deserialize)]
struct TokenXml {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordXml {
    header: HeaderXml,
    metadata: Option<MetadataXml>,
}

#[derive(Debug, Deserialize)]
struct HeaderXml {
    #[serde(rename = "@status")]
    status: Option<String>,
    identifier: Option<String>,
    datestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataXml {
    // Dublin Core containers appear prefixed (`oai_dc:dc`) or bare
    // depending on the repository software.
    #[serde(rename = "oai_dc:dc", alias = "dc")]
    dc: Option<DublinCoreXml>,
}

#[derive(Debug, Deserialize)]
struct DublinCoreXml {
    #[serde(rename = "dc:date", alias = "date", default)]
    dates: Vec<String>,
}

impl RecordXml {
    fn into_record(self) -> OaiRecord {
        let deleted = self
            .header
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("deleted"));
        let dates = self
            .metadata
            .and_then(|m| m.dc)
            .map(|dc| dc.dates)
            .unwrap_or_default();

        OaiRecord {
            identifier: self.header.identifier.unwrap_or_default(),
            datestamp: self.header.datestamp,
            deleted,
            dates,
        }
    }
}

// ==================== client ====================

/// HTTP client for one repository's OAI-PMH endpoint.
#[derive(Debug, Clone)]
pub struct OaiClient {
    client: Client,
    base_url: String,
}

impl OaiClient {
    /// Creates a client for the given OAI-PMH base URL.
    ///
    /// # Errors
    ///
    /// Returns [`OaiError::Network`] if HTTP client construction fails.
    pub fn new(base_url: impl Into<String>) -> Result<Self, OaiError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .gzip(true)
            .build()
            .map_err(|source| OaiError::Network {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self { client, base_url })
    }

    /// Fetches the first `ListRecords` page for a metadata prefix.
    ///
    /// # Errors
    ///
    /// Returns [`OaiError`] on transport failure, non-success status, an
    /// OAI `<error>` envelope, or an unparseable body.
    pub async fn list_records(&self, metadata_prefix: &str) -> Result<RecordPage, OaiError> {
        self.fetch_page(&[
            ("verb", "ListRecords"),
            ("metadataPrefix", metadata_prefix),
        ])
        .await
    }

    /// Fetches a continuation page using a resumption token.
    ///
    /// # Errors
    ///
    /// Returns [`OaiError`] on transport failure, non-success status, an
    /// OAI `<error>` envelope, or an unparseable body.
    pub async fn resume(&self, token: &str) -> Result<RecordPage, OaiError> {
        self.fetch_page(&[("verb", "ListRecords"), ("resumptionToken", token)])
            .await
    }

    async fn fetch_page(&self, query: &[(&str, &str)]) -> Result<RecordPage, OaiError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(query)
            .send()
            .await
            .map_err(|source| OaiError::Network {
                url: self.base_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OaiError::HttpStatus {
                url: self.base_url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| OaiError::Network {
            url: self.base_url.clone(),
            source,
        })?;

        let envelope: EnvelopeXml =
            quick_xml::de::from_str(&body).map_err(|e| OaiError::MalformedResponse {
                url: self.base_url.clone(),
                detail: e.to_string(),
            })?;

        if let Some(error) = envelope.error {
            return Err(OaiError::Protocol {
                code: error.code.unwrap_or_else(|| "unknown".to_string()),
                message: error.message.unwrap_or_default(),
            });
        }

        let Some(list) = envelope.list_records else {
            return Err(OaiError::MalformedResponse {
                url: self.base_url.clone(),
                detail: "missing ListRecords element".to_string(),
            });
        };

        let resumption_token = list
            .resumption_token
            .and_then(|t| t.value)
            .filter(|t| !t.trim().is_empty());

        debug!(
            records = list.records.len(),
            has_token = resumption_token.is_some(),
            "fetched ListRecords page"
        );

        Ok(RecordPage {
            records: list.records.into_iter().map(RecordXml::into_record).collect(),
            resumption_token,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(body: &str) -> EnvelopeXml {
        quick_xml::de::from_str(body).unwrap()
    }

    #[test]
    fn test_envelope_parses_records_and_token() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
        <OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
          <responseDate>2024-01-01T00:00:00Z</responseDate>
          <ListRecords>
            <record>
              <header>
                <identifier>doi:10.1234/abc</identifier>
                <datestamp>2023-06-01T12:00:00Z</datestamp>
              </header>
              <metadata>
                <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
                           xmlns:dc="http://purl.org/dc/elements/1.1/">
                  <dc:title>Example</dc:title>
                  <dc:date>2023-05-01</dc:date>
                  <dc:date>2023-06-01</dc:date>
                </oai_dc:dc>
              </metadata>
            </record>
            <resumptionToken cursor="0" completeListSize="2">page-2</resumptionToken>
          </ListRecords>
        </OAI-PMH>"#;

        let envelope = parse(body);
        let list = envelope.list_records.unwrap();
        assert_eq!(list.records.len(), 1);

        let record = list.records.into_iter().next().unwrap().into_record();
        assert_eq!(record.identifier, "doi:10.1234/abc");
        assert_eq!(record.datestamp.as_deref(), Some("2023-06-01T12:00:00Z"));
        assert!(!record.deleted);
        assert_eq!(record.first_date(), Some("2023-05-01"));

        assert_eq!(list.resumption_token.unwrap().value.unwrap(), "page-2");
    }

    #[test]
    fn test_envelope_parses_deleted_record() {
        let body = r#"<OAI-PMH>
          <ListRecords>
            <record>
              <header status="deleted">
                <identifier>doi:10.1234/gone</identifier>
                <datestamp>2023-06-01</datestamp>
              </header>
            </record>
          </ListRecords>
        </OAI-PMH>"#;

        let envelope = parse(body);
        let record = envelope
            .list_records
            .unwrap()
            .records
            .into_iter()
            .next()
            .unwrap()
            .into_record();
        assert!(record.deleted);
        assert!(record.dates.is_empty());
    }

    #[test]
    fn test_envelope_parses_protocol_error() {
        let body = r#"<OAI-PMH>
          <error code="badResumptionToken">token expired</error>
        </OAI-PMH>"#;

        let envelope = parse(body);
        let error = envelope.error.unwrap();
        assert_eq!(error.code.as_deref(), Some("badResumptionToken"));
        assert_eq!(error.message.as_deref(), Some("token expired"));
    }

    #[test]
    fn test_envelope_parses_unprefixed_dc() {
        let body = r#"<OAI-PMH>
          <ListRecords>
            <record>
              <header>
                <identifier>10.1234/plain</identifier>
                <datestamp>2023-06-01</datestamp>
              </header>
              <metadata>
                <dc>
                  <date>2022-12-31</date>
                </dc>
              </metadata>
            </record>
          </ListRecords>
        </OAI-PMH>"#;

        let envelope = parse(body);
        let record = envelope
            .list_records
            .unwrap()
            .records
            .into_iter()
            .next()
            .unwrap()
            .into_record();
        assert_eq!(record.first_date(), Some("2022-12-31"));
    }

    #[test]
    fn test_empty_resumption_token_means_done() {
        let body = r#"<OAI-PMH>
          <ListRecords>
            <record>
              <header>
                <identifier>10.1234/x</identifier>
                <datestamp>2023-06-01</datestamp>
              </header>
            </record>
            <resumptionToken/>
          </ListRecords>
        </OAI-PMH>"#;

        let envelope = parse(body);
        let token = envelope
            .list_records
            .unwrap()
            .resumption_token
            .and_then(|t| t.value)
            .filter(|t| !t.trim().is_empty());
        assert!(token.is_none());
    }
}
