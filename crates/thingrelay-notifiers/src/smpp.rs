//! SMS notifier speaking SMPP 3.4 to an SMSC.
//!
//! Each notification opens one session: `bind_transmitter`, one `submit_sm`
//! per contact, then `unbind`. Only the PDUs of that exchange are encoded.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use thingrelay_core::config::SmppConfig;

use crate::error::{NotifierError, Result};
use crate::model::Notification;
use crate::notifier::{validate_phone_numbers, Notifier};

pub const BIND_TRANSMITTER: u32 = 0x0000_0002;
pub const SUBMIT_SM: u32 = 0x0000_0004;
pub const UNBIND: u32 = 0x0000_0006;
pub const GENERIC_NACK: u32 = 0x8000_0000;
const RESPONSE_BIT: u32 = 0x8000_0000;

const HEADER_LEN: usize = 16;
const MAX_PDU_LEN: usize = 64 * 1024;
const MAX_SHORT_MESSAGE: usize = 254;
const INTERFACE_VERSION: u8 = 0x34;
const DATA_CODING_DEFAULT: u8 = 0x00;
const DATA_CODING_UCS2: u8 = 0x08;
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub command_id: u32,
    pub status: u32,
    pub sequence: u32,
    pub body: Bytes,
}

impl Pdu {
    pub fn new(command_id: u32, sequence: u32, body: Bytes) -> Self {
        Self {
            command_id,
            status: 0,
            sequence,
            body,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_u32((HEADER_LEN + self.body.len()) as u32);
        buf.put_u32(self.command_id);
        buf.put_u32(self.status);
        buf.put_u32(self.sequence);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode a PDU whose length prefix has already been checked.
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(NotifierError::Smpp(format!("short PDU of {} bytes", frame.len())));
        }
        let length = frame.get_u32() as usize;
        if length != frame.len() + 4 {
            return Err(NotifierError::Smpp(format!("PDU length {} does not match frame", length)));
        }
        let command_id = frame.get_u32();
        let status = frame.get_u32();
        let sequence = frame.get_u32();
        Ok(Self {
            command_id,
            status,
            sequence,
            body: frame,
        })
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let length = reader.read_u32().await? as usize;
        if !(HEADER_LEN..=MAX_PDU_LEN).contains(&length) {
            return Err(NotifierError::Smpp(format!("invalid PDU length {}", length)));
        }
        let mut frame = BytesMut::with_capacity(length);
        frame.put_u32(length as u32);
        frame.resize(length, 0);
        reader.read_exact(&mut frame[4..]).await?;
        Self::decode(frame.freeze())
    }
}

fn put_c_string(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Short message bytes and data coding. Non-ASCII text goes out as UCS-2;
/// either form is cut to the 254 octets `submit_sm` carries.
pub fn encode_short_message(text: &str) -> (u8, Vec<u8>) {
    if text.is_ascii() {
        let mut bytes = text.as_bytes().to_vec();
        bytes.truncate(MAX_SHORT_MESSAGE);
        return (DATA_CODING_DEFAULT, bytes);
    }
    let mut bytes = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        if bytes.len() + 2 > MAX_SHORT_MESSAGE {
            break;
        }
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    (DATA_CODING_UCS2, bytes)
}

pub struct SmppNotifier {
    config: SmppConfig,
}

impl SmppNotifier {
    pub fn new(config: SmppConfig) -> Self {
        Self { config }
    }

    fn bind_body(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_c_string(&mut buf, &self.config.system_id);
        put_c_string(&mut buf, &self.config.password);
        put_c_string(&mut buf, &self.config.system_type);
        buf.put_u8(INTERFACE_VERSION);
        buf.put_u8(self.config.source_addr_ton);
        buf.put_u8(self.config.source_addr_npi);
        put_c_string(&mut buf, "");
        buf.freeze()
    }

    fn submit_body(&self, destination: &str, text: &str) -> Bytes {
        let (data_coding, message) = encode_short_message(text);
        let mut buf = BytesMut::new();
        put_c_string(&mut buf, "");
        buf.put_u8(self.config.source_addr_ton);
        buf.put_u8(self.config.source_addr_npi);
        put_c_string(&mut buf, &self.config.source_addr);
        buf.put_u8(self.config.dest_addr_ton);
        buf.put_u8(self.config.dest_addr_npi);
        put_c_string(&mut buf, destination);
        buf.put_u8(0); // esm_class
        buf.put_u8(0); // protocol_id
        buf.put_u8(0); // priority_flag
        put_c_string(&mut buf, ""); // schedule_delivery_time
        put_c_string(&mut buf, ""); // validity_period
        buf.put_u8(0); // registered_delivery
        buf.put_u8(0); // replace_if_present_flag
        buf.put_u8(data_coding);
        buf.put_u8(0); // sm_default_msg_id
        buf.put_u8(message.len() as u8);
        buf.put_slice(&message);
        buf.freeze()
    }

    async fn session(&self, contacts: &[String], text: &str) -> Result<()> {
        let mut stream = TcpStream::connect(&self.config.address).await?;
        let mut sequence = 0u32;

        sequence += 1;
        call(&mut stream, Pdu::new(BIND_TRANSMITTER, sequence, self.bind_body())).await?;

        for contact in contacts {
            sequence += 1;
            call(&mut stream, Pdu::new(SUBMIT_SM, sequence, self.submit_body(contact, text))).await?;
            debug!(destination = %contact, "SMS submitted");
        }

        sequence += 1;
        call(&mut stream, Pdu::new(UNBIND, sequence, Bytes::new())).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Send a request and wait for its response.
async fn call(stream: &mut TcpStream, request: Pdu) -> Result<Pdu> {
    stream.write_all(&request.encode()).await?;
    let response = timeout(IO_TIMEOUT, Pdu::read_from(stream))
        .await
        .map_err(|_| NotifierError::Smpp("timed out waiting for response".to_string()))??;

    if response.command_id == GENERIC_NACK {
        return Err(NotifierError::Smpp(format!("generic_nack, status {:#x}", response.status)));
    }
    if response.command_id != (request.command_id | RESPONSE_BIT) || response.sequence != request.sequence {
        return Err(NotifierError::Smpp(format!(
            "unexpected response {:#x} seq {}",
            response.command_id, response.sequence
        )));
    }
    if response.status != 0 {
        return Err(NotifierError::Smpp(format!(
            "command {:#x} failed with status {:#x}",
            request.command_id, response.status
        )));
    }
    Ok(response)
}

#[async_trait]
impl Notifier for SmppNotifier {
    fn kind(&self) -> &str {
        "smpp"
    }

    fn validate_contacts(&self, contacts: &[String]) -> Result<()> {
        validate_phone_numbers(contacts)
    }

    async fn notify(&self, contacts: &[String], notification: &Notification) -> Result<()> {
        if contacts.is_empty() {
            return Err(NotifierError::SendFailed("No recipients configured".to_string()));
        }
        self.session(contacts, &notification.content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_pdu_layout() {
        let pdu = Pdu::new(UNBIND, 7, Bytes::new());
        let encoded = pdu.encode();
        assert_eq!(
            encoded.as_ref(),
            &[0, 0, 0, 16, 0, 0, 0, 6, 0, 0, 0, 0, 0, 0, 0, 7]
        );
        assert_eq!(Pdu::decode(encoded).unwrap(), pdu);
        assert!(Pdu::decode(Bytes::from_static(&[0, 0, 0, 20, 0, 0])).is_err());
    }

    #[test]
    fn test_short_message_coding() {
        assert_eq!(encode_short_message("hi"), (DATA_CODING_DEFAULT, b"hi".to_vec()));
        let (coding, bytes) = encode_short_message("ž");
        assert_eq!(coding, DATA_CODING_UCS2);
        assert_eq!(bytes, vec![0x01, 0x7e]);

        let (_, long) = encode_short_message(&"x".repeat(400));
        assert_eq!(long.len(), MAX_SHORT_MESSAGE);
    }

    /// Accepts one session and answers every request, rejecting submits to
    /// `reject`.
    async fn fake_smsc(reject: &'static str) -> (String, tokio::task::JoinHandle<Vec<u32>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            while let Ok(pdu) = Pdu::read_from(&mut socket).await {
                seen.push(pdu.command_id);
                let mut response = Pdu::new(pdu.command_id | RESPONSE_BIT, pdu.sequence, Bytes::new());
                if pdu.command_id == SUBMIT_SM && pdu.body.windows(reject.len()).any(|w| w == reject.as_bytes()) {
                    response.status = 0x0b;
                }
                socket.write_all(&response.encode()).await.unwrap();
                if pdu.command_id == UNBIND {
                    break;
                }
            }
            seen
        });
        (address, handle)
    }

    fn notifier(address: String) -> SmppNotifier {
        SmppNotifier::new(SmppConfig {
            address,
            system_id: "relay".into(),
            password: "secret".into(),
            source_addr: "ThingRelay".into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_session_against_smsc() {
        let (address, smsc) = fake_smsc("999").await;
        notifier(address)
            .notify(&["+3816411".into(), "+3816422".into()], &Notification::new("s", "hot"))
            .await
            .unwrap();
        assert_eq!(smsc.await.unwrap(), vec![BIND_TRANSMITTER, SUBMIT_SM, SUBMIT_SM, UNBIND]);
    }

    #[tokio::test]
    async fn test_rejected_submit_fails() {
        let (address, _smsc) = fake_smsc("999").await;
        let err = notifier(address)
            .notify(&["999".into()], &Notification::new("s", "hot"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifierError::Smpp(_)));
    }
}
