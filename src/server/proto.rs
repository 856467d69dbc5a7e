use derive_more::Display;

/// The protocols a connection can serve.
///
/// The set is closed because error translation is protocol sensitive: SFTP
/// clients expect status-coded errors while the other surfaces work with the
/// crate's sentinel errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Protocol {
    /// The SSH file transfer protocol.
    #[display(fmt = "SFTP")]
    Sftp,
    /// FTP and FTPS.
    #[display(fmt = "FTP")]
    Ftp,
    /// WebDAV over HTTP(S).
    #[display(fmt = "DAV")]
    WebDav,
    /// The plain HTTP interface.
    #[display(fmt = "HTTP")]
    Http,
    /// Public share downloads over HTTP.
    #[display(fmt = "HTTPShare")]
    HttpShare,
    /// Internal connections used by data retention jobs.
    #[display(fmt = "DataRetention")]
    DataRetention,
    /// Internal connections opened during OpenID Connect logins.
    #[display(fmt = "OIDC")]
    Oidc,
    /// Internal connections used by event driven actions.
    #[display(fmt = "EventAction")]
    EventAction,
}

impl Protocol {
    /// Every supported protocol.
    pub const ALL: [Protocol; 8] = [
        Protocol::Sftp,
        Protocol::Ftp,
        Protocol::WebDav,
        Protocol::Http,
        Protocol::HttpShare,
        Protocol::DataRetention,
        Protocol::Oidc,
        Protocol::EventAction,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        assert_eq!(Protocol::Sftp.to_string(), "SFTP");
        assert_eq!(Protocol::WebDav.to_string(), "DAV");
        assert_eq!(Protocol::ALL.len(), 8);
    }
}
