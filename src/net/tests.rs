#[cfg(test)]
mod tests {
    use crate::net::pool::{ConnectionPool, SendOutcome};
    use crate::net::protocol::{read_frame, write_frame, Event, MetadataKind};
    use crate::net::reactor::{event_queue, spawn_listener, NodeEvent};
    use crate::topology::NodeInfo;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let event = Event::MetadataRequest {
            kind: MetadataKind::Filesystem,
            filesystems: vec!["weather".into()],
        };
        write_frame(&mut a, &event).await.unwrap();
        let read = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(read, event);

        // Clean close at a frame boundary is end of stream, not an error.
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_serialization_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&8u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0xff; 8]).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, crate::error::NodeError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_pool_send_and_reuse() {
        let (server_queue, mut server_rx) = event_queue();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        spawn_listener(listener, server_queue);

        let (client_queue, _client_rx) = event_queue();
        let pool = ConnectionPool::new(client_queue);
        let node = NodeInfo::new("127.0.0.1", addr.port());

        let event = Event::MetadataRequest {
            kind: MetadataKind::Overview,
            filesystems: vec![],
        };
        assert_eq!(pool.send(&node, event.clone()).await, SendOutcome::Sent);
        assert_eq!(pool.len(), 1);

        match server_rx.recv().await.unwrap() {
            NodeEvent::Wire { event: received, .. } => assert_eq!(received, event),
            other => panic!("unexpected envelope: {:?}", other),
        }

        // Second send reuses the cached connection.
        assert_eq!(pool.send(&node, event).await, SendOutcome::Sent);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_pool_send_to_dead_peer_fails() {
        // Grab a free port, then leave nothing listening on it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (queue, _rx) = event_queue();
        let pool = ConnectionPool::new(queue);
        let node = NodeInfo::new("127.0.0.1", port);
        let event = Event::MetadataRequest {
            kind: MetadataKind::Features,
            filesystems: vec![],
        };
        assert_eq!(pool.send(&node, event).await, SendOutcome::Failed);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_reader_survives_malformed_frame() {
        let (server_queue, mut server_rx) = event_queue();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        spawn_listener(listener, server_queue);

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        // One well-framed but undecodable body, then a valid event.
        stream.write_all(&4u32.to_be_bytes()).await.unwrap();
        stream.write_all(&[0xee; 4]).await.unwrap();
        let event = Event::MetadataRequest {
            kind: MetadataKind::Filesystem,
            filesystems: vec![],
        };
        write_frame(&mut stream, &event).await.unwrap();

        match server_rx.recv().await.unwrap() {
            NodeEvent::Wire { event: received, .. } => assert_eq!(received, event),
            other => panic!("unexpected envelope: {:?}", other),
        }
    }
}
