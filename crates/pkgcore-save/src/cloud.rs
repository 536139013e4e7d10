//! Cloud save/load HTTP client (spec §4.7, §6.2), grounded on
//! `pkgcore-downloader`'s `RangeClient` for the request-issuing shape and on
//! the original's `CloudRequestMonitor` for the status-code vocabulary.
//! Unlike the downloader's range client, a cloud round-trip is a single
//! `POST` with no partial-response semantics, so there is no analogue of
//! `Content-Range` validation here.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use pkgcore_bytestream::ByteStream;
use url::Url;

use crate::container::SaveFileMetadata;
use crate::error::{SaveError, SaveResult};
use crate::tree::DataNode;

/// Well-known cloud response status codes (spec §4.7, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudStatus {
    Success,
    ServerHasNoData,
    ServerHasSentData,
    ServerNeedsFullCheckpoint,
    SuccessWithMetadata,
    ServerError(reqwest::StatusCode),
    ClientError(reqwest::StatusCode),
}

impl CloudStatus {
    fn from_http(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            200 => Self::Success,
            250 => Self::ServerHasNoData,
            251 => Self::ServerHasSentData,
            252 => Self::ServerNeedsFullCheckpoint,
            253 => Self::SuccessWithMetadata,
            code if (500..600).contains(&code) => Self::ServerError(status),
            _ => Self::ClientError(status),
        }
    }
}

/// The interpreted result of one cloud round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudOutcome {
    /// Plain `200`: server accepted, no further action needed.
    Success,
    /// `250`: equivalent to "file not found" on load.
    NoData,
    /// `251` with a body: server is handing back a full replacement.
    /// `None` means the body was empty, i.e. a server-triggered reset.
    DataReplacement(Option<(SaveFileMetadata, DataNode)>),
    /// `252`: resend with `transaction_id_min = 0` and a full snapshot.
    NeedsFullCheckpoint,
    /// `253`: echoes the metadata the client sent, for the caller to
    /// confirm `session_guid` / `transaction_id_max` match.
    SuccessWithMetadata(SaveFileMetadata),
}

/// Encode `(metadata, node)` as a base64 payload suitable for the `251` /
/// `253` echo formats (spec §6.2).
fn encode_metadata_and_node(metadata: &SaveFileMetadata, node: Option<&DataNode>) -> String {
    let mut stream = ByteStream::new();
    metadata.to_node().encode(&mut stream);
    if let Some(node) = node {
        node.encode(&mut stream);
    }
    BASE64.encode(stream.into_vec())
}

fn decode_metadata_and_node(body_base64: &str) -> SaveResult<(SaveFileMetadata, Option<DataNode>)> {
    let bytes = BASE64.decode(body_base64.trim()).map_err(|_| SaveError::Deserialization)?;
    let mut stream = ByteStream::from_bytes(bytes);
    let metadata_node = DataNode::decode(&mut stream)?;
    let metadata = SaveFileMetadata::from_node(&metadata_node)?;
    let node = if stream.position() < stream.len() {
        Some(DataNode::decode(&mut stream)?)
    } else {
        None
    };
    Ok((metadata, node))
}

pub struct CloudClient {
    client: reqwest::Client,
}

impl CloudClient {
    pub fn new(timeout: std::time::Duration) -> SaveResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// `POST` the pending delta to `url` (spec §6.2: `data` and
    /// `target_md5` form fields) and interpret the response.
    pub async fn submit_delta(
        &self,
        url: &Url,
        encrypted_delta: &[u8],
        expected_save_data: &[u8],
        metadata: &SaveFileMetadata,
    ) -> SaveResult<CloudOutcome> {
        let target_md5 = hex::encode(Md5::digest(expected_save_data));
        let data = BASE64.encode(encrypted_delta);

        let response = self
            .client
            .post(url.clone())
            .form(&[("data", data.as_str()), ("target_md5", target_md5.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        self.interpret(status, &body, Some(metadata))
    }

    /// Fetch a slot's data from the cloud (a load request carries no
    /// delta, only the client's current metadata for reconciliation).
    pub async fn fetch_load(&self, url: &Url, metadata: &SaveFileMetadata) -> SaveResult<CloudOutcome> {
        let payload = encode_metadata_and_node(metadata, None);
        let response = self
            .client
            .post(url.clone())
            .form(&[("data", payload.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        self.interpret(status, &body, None)
    }

    fn interpret(
        &self,
        status: reqwest::StatusCode,
        body: &str,
        sent_metadata: Option<&SaveFileMetadata>,
    ) -> SaveResult<CloudOutcome> {
        match CloudStatus::from_http(status) {
            CloudStatus::Success => Ok(CloudOutcome::Success),
            CloudStatus::ServerHasNoData => Ok(CloudOutcome::NoData),
            CloudStatus::ServerHasSentData => {
                if body.trim().is_empty() {
                    Ok(CloudOutcome::DataReplacement(None))
                } else {
                    let (metadata, node) = decode_metadata_and_node(body)?;
                    let save_data = node.ok_or(SaveError::Deserialization)?;
                    Ok(CloudOutcome::DataReplacement(Some((metadata, save_data))))
                }
            }
            CloudStatus::ServerNeedsFullCheckpoint => Ok(CloudOutcome::NeedsFullCheckpoint),
            CloudStatus::SuccessWithMetadata => {
                let (returned, _) = decode_metadata_and_node(body)?;
                if let Some(sent) = sent_metadata {
                    if returned.session_guid != sent.session_guid {
                        return Err(SaveError::SessionGuidMismatch);
                    }
                    if returned.transaction_id_max != sent.transaction_id_max {
                        return Err(SaveError::TransactionIdMax);
                    }
                }
                Ok(CloudOutcome::SuccessWithMetadata(returned))
            }
            CloudStatus::ServerError(status) => {
                tracing::warn!(%status, body, "cloud endpoint returned a transient error");
                Err(SaveError::ServerInternalFailure(status))
            }
            CloudStatus::ClientError(status) => {
                tracing::warn!(%status, body, "cloud endpoint rejected the request");
                Err(SaveError::ServerRejection(status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> SaveFileMetadata {
        SaveFileMetadata {
            session_guid: "abc".to_string(),
            version: 1,
            transaction_id_min: 0,
            transaction_id_max: 3,
        }
    }

    #[test]
    fn status_code_classification() {
        assert_eq!(
            CloudStatus::from_http(reqwest::StatusCode::from_u16(200).unwrap()),
            CloudStatus::Success
        );
        assert_eq!(
            CloudStatus::from_http(reqwest::StatusCode::from_u16(250).unwrap()),
            CloudStatus::ServerHasNoData
        );
        assert_eq!(
            CloudStatus::from_http(reqwest::StatusCode::from_u16(503).unwrap()),
            CloudStatus::ServerError(reqwest::StatusCode::from_u16(503).unwrap())
        );
        assert_eq!(
            CloudStatus::from_http(reqwest::StatusCode::from_u16(404).unwrap()),
            CloudStatus::ClientError(reqwest::StatusCode::from_u16(404).unwrap())
        );
    }

    #[test]
    fn metadata_and_node_round_trip_through_base64_echo() {
        let metadata = sample_metadata();
        let save_data = DataNode::Int(7);
        let payload = encode_metadata_and_node(&metadata, Some(&save_data));
        let (decoded_metadata, decoded_node) = decode_metadata_and_node(&payload).unwrap();
        assert_eq!(decoded_metadata, metadata);
        assert_eq!(decoded_node, Some(save_data));
    }
}
