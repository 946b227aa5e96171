//! TCP transport for client sessions.

use crate::error::SessionError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::debug;

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a server, giving up after `ceiling`
pub async fn connect_tcp(addr: SocketAddr, ceiling: Duration) -> Result<TcpStream, SessionError> {
    let stream = match timeout(ceiling, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(SessionError::ConnectFailure {
                addr,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(SessionError::ConnectFailure {
                addr,
                reason: format!("timed out after {:?}", ceiling),
            })
        }
    };

    stream.set_nodelay(true)?;
    debug!("Socket connection established to {}", addr);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.map(|(_, peer)| peer) });
        let stream = connect_tcp(addr, Duration::from_secs(1)).await.unwrap();

        assert!(stream.nodelay().unwrap());
        assert_eq!(accept.await.unwrap().unwrap(), stream.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_refused_connect_is_connect_failure() {
        // bind then drop to obtain a port nobody listens on
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_tcp(addr, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectFailure { addr: a, .. } if a == addr));
    }
}
