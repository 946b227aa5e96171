//! Protocol record structures for the wire protocol.

use crate::archive::{InputArchive, OutputArchive, Record};
use crate::error::WireError;

/// Session establishment request, the first frame on every connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Protocol version
    pub protocol_version: i32,
    /// Last transaction id seen by the client
    pub last_zxid_seen: i64,
    /// Requested session timeout in milliseconds
    pub timeout: i32,
    /// Session id to resume, 0 for a new session
    pub session_id: i64,
    /// Session password, empty for a new session
    pub passwd: Vec<u8>,
}

impl Record for ConnectRequest {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_i32(self.protocol_version);
        ar.write_i64(self.last_zxid_seen);
        ar.write_i32(self.timeout);
        ar.write_i64(self.session_id);
        ar.write_buffer(Some(&self.passwd));
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.protocol_version = ar.read_i32()?;
        self.last_zxid_seen = ar.read_i64()?;
        self.timeout = ar.read_i32()?;
        self.session_id = ar.read_i64()?;
        self.passwd = ar.read_buffer()?.map(|b| b.to_vec()).unwrap_or_default();
        Ok(())
    }
}

/// Server answer to a [`ConnectRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectResponse {
    /// Protocol version
    pub protocol_version: i32,
    /// Negotiated session timeout in milliseconds, `<= 0` means expired
    pub timeout: i32,
    /// Assigned session id
    pub session_id: i64,
    /// Assigned session password
    pub passwd: Vec<u8>,
}

impl Record for ConnectResponse {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_i32(self.protocol_version);
        ar.write_i32(self.timeout);
        ar.write_i64(self.session_id);
        ar.write_buffer(Some(&self.passwd));
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.protocol_version = ar.read_i32()?;
        self.timeout = ar.read_i32()?;
        self.session_id = ar.read_i64()?;
        self.passwd = ar.read_buffer()?.map(|b| b.to_vec()).unwrap_or_default();
        Ok(())
    }
}

/// Credential presented to the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPacket {
    /// Auth type, always 0
    pub auth_type: i32,
    /// Auth scheme, e.g. `digest`
    pub scheme: String,
    /// Opaque credential bytes
    pub auth: Vec<u8>,
}

impl Record for AuthPacket {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_i32(self.auth_type);
        ar.write_string(Some(&self.scheme));
        ar.write_buffer(Some(&self.auth));
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.auth_type = ar.read_i32()?;
        self.scheme = ar.read_string()?.unwrap_or_default();
        self.auth = ar.read_buffer()?.map(|b| b.to_vec()).unwrap_or_default();
        Ok(())
    }
}

/// Watch re-registration sent after a reconnect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetWatches {
    /// Transaction id the watches were valid at
    pub relative_zxid: i64,
    /// Paths with data watches
    pub data_watches: Vec<String>,
    /// Paths with exists watches
    pub exist_watches: Vec<String>,
    /// Paths with child watches
    pub child_watches: Vec<String>,
}

impl Record for SetWatches {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_i64(self.relative_zxid);
        ar.write_string_vec(Some(&self.data_watches));
        ar.write_string_vec(Some(&self.exist_watches));
        ar.write_string_vec(Some(&self.child_watches));
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.relative_zxid = ar.read_i64()?;
        self.data_watches = ar.read_string_vec()?.unwrap_or_default();
        self.exist_watches = ar.read_string_vec()?.unwrap_or_default();
        self.child_watches = ar.read_string_vec()?.unwrap_or_default();
        Ok(())
    }
}

/// Watcher notification payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherEvent {
    /// Event type code
    pub event_type: i32,
    /// Keeper state code
    pub state: i32,
    /// Server-side path
    pub path: String,
}

impl Record for WatcherEvent {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_i32(self.event_type);
        ar.write_i32(self.state);
        ar.write_string(Some(&self.path));
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.event_type = ar.read_i32()?;
        self.state = ar.read_i32()?;
        self.path = ar.read_string()?.unwrap_or_default();
        Ok(())
    }
}

/// Node metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Zxid of the creating transaction
    pub czxid: i64,
    /// Zxid of the last modifying transaction
    pub mzxid: i64,
    /// Creation time in ms since epoch
    pub ctime: i64,
    /// Last modification time in ms since epoch
    pub mtime: i64,
    /// Data version
    pub version: i32,
    /// Child list version
    pub cversion: i32,
    /// ACL version
    pub aversion: i32,
    /// Owning session id for ephemeral nodes, 0 otherwise
    pub ephemeral_owner: i64,
    /// Data length
    pub data_length: i32,
    /// Number of children
    pub num_children: i32,
    /// Zxid of the last child list change
    pub pzxid: i64,
}

impl Record for Stat {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_i64(self.czxid);
        ar.write_i64(self.mzxid);
        ar.write_i64(self.ctime);
        ar.write_i64(self.mtime);
        ar.write_i32(self.version);
        ar.write_i32(self.cversion);
        ar.write_i32(self.aversion);
        ar.write_i64(self.ephemeral_owner);
        ar.write_i32(self.data_length);
        ar.write_i32(self.num_children);
        ar.write_i64(self.pzxid);
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.czxid = ar.read_i64()?;
        self.mzxid = ar.read_i64()?;
        self.ctime = ar.read_i64()?;
        self.mtime = ar.read_i64()?;
        self.version = ar.read_i32()?;
        self.cversion = ar.read_i32()?;
        self.aversion = ar.read_i32()?;
        self.ephemeral_owner = ar.read_i64()?;
        self.data_length = ar.read_i32()?;
        self.num_children = ar.read_i32()?;
        self.pzxid = ar.read_i64()?;
        Ok(())
    }
}

/// Read a node's data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetDataRequest {
    /// Server-side path
    pub path: String,
    /// Leave a data watch
    pub watch: bool,
}

impl Record for GetDataRequest {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_string(Some(&self.path));
        ar.write_bool(self.watch);
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.path = ar.read_string()?.unwrap_or_default();
        self.watch = ar.read_bool()?;
        Ok(())
    }
}

/// Answer to [`GetDataRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetDataResponse {
    /// Node data, `None` when the node holds a null payload
    pub data: Option<Vec<u8>>,
    /// Node metadata
    pub stat: Stat,
}

impl Record for GetDataResponse {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_buffer(self.data.as_deref());
        self.stat.serialize(ar);
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.data = ar.read_buffer()?.map(|b| b.to_vec());
        self.stat.deserialize(ar)
    }
}

/// Check whether a node exists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistsRequest {
    /// Server-side path
    pub path: String,
    /// Leave an exists watch
    pub watch: bool,
}

impl Record for ExistsRequest {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_string(Some(&self.path));
        ar.write_bool(self.watch);
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.path = ar.read_string()?.unwrap_or_default();
        self.watch = ar.read_bool()?;
        Ok(())
    }
}

/// Answer to [`ExistsRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistsResponse {
    /// Node metadata
    pub stat: Stat,
}

impl Record for ExistsResponse {
    fn serialize(&self, ar: &mut OutputArchive) {
        self.stat.serialize(ar);
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.stat.deserialize(ar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_layout() {
        let request = ConnectRequest {
            protocol_version: 0,
            last_zxid_seen: 7,
            timeout: 30_000,
            session_id: 0x10,
            passwd: vec![1, 2],
        };

        let mut ar = OutputArchive::new();
        request.serialize(&mut ar);
        let bytes = ar.into_bytes();

        // version(4) + zxid(8) + timeout(4) + session(8) + passwd(4 + 2)
        assert_eq!(bytes.len(), 30);
        assert_eq!(&bytes[4..12], &7i64.to_be_bytes());
        assert_eq!(&bytes[12..16], &30_000i32.to_be_bytes());
        assert_eq!(&bytes[24..], &[0, 0, 0, 2, 1, 2]);
    }

    #[test]
    fn test_get_data_response_null_payload() {
        let response = GetDataResponse {
            data: None,
            stat: Stat {
                version: 3,
                ..Stat::default()
            },
        };
        let mut ar = OutputArchive::new();
        response.serialize(&mut ar);

        let mut decoded = GetDataResponse {
            data: Some(b"stale".to_vec()),
            ..GetDataResponse::default()
        };
        decoded
            .deserialize(&mut InputArchive::new(ar.into_bytes()))
            .unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_downcast_boxed_record() {
        let boxed: Box<dyn Record> = Box::new(ExistsResponse::default());
        assert!(boxed.downcast_ref::<ExistsResponse>().is_some());
        assert!(boxed.downcast_ref::<GetDataResponse>().is_none());
    }
}
