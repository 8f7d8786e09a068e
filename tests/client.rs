#[cfg(test)]
mod tests {
    use muxloop::{CloseReason, Config, Error, EventLoop, Role};
    use std::io::{self, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    /// Reads one request, up to and including the blank line.
    fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut byte = [0u8; 1];

        while !request.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).expect("Failed to read request");
            assert!(n > 0, "peer closed before the request was complete");
            request.push(byte[0]);
        }

        request
    }

    #[test]
    fn test_peer_closing_without_data_yields_empty_buffer() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener.local_addr().expect("Failed to get local address").port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            let request = read_request(&mut stream);
            String::from_utf8(request).expect("Request is not text")
        });

        let mut event_loop = EventLoop::new(Config::default()).expect("Failed to create loop");
        let id = event_loop.open("127.0.0.1", port).expect("Failed to open");

        let closed = event_loop.run().expect("Loop failed");
        let request = handle.join().expect("Thread panicked");

        assert!(request.starts_with("GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n"));
        assert!(request.contains("User-Agent: curl/7.43.0\r\n"));

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, id);
        assert_eq!(closed[0].role, Role::Established);
        assert!(closed[0].is_success());
        assert!(closed[0].received.is_empty());
        assert!(event_loop.is_empty());
    }

    #[test]
    fn test_expired_connect_is_torn_down() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener.local_addr().expect("Failed to get local address").port();

        let mut event_loop = EventLoop::new(Config::default()).expect("Failed to create loop");
        event_loop
            .open_with_timeout("127.0.0.1", port, Some(Duration::ZERO))
            .expect("Failed to open");
        assert_eq!(event_loop.len(), 1);

        let closed = event_loop.run().expect("Loop failed");

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].role, Role::Connecting);
        assert!(matches!(
            closed[0].error(),
            Some(Error::ConnectTimeout { after, .. }) if after.is_zero()
        ));
        assert!(event_loop.is_empty());
    }

    #[test]
    fn test_unreachable_peer_reports_establishment_failure() {
        let config = Config::new().connect_timeout(Some(Duration::from_millis(200)));
        let mut event_loop = EventLoop::new(config).expect("Failed to create loop");

        // TEST-NET-1 is never routed; depending on the host this either times
        // out or fails as unreachable.
        event_loop.open("192.0.2.1", 9527).expect("Failed to open");

        let closed = event_loop.run().expect("Loop failed");

        assert_eq!(closed.len(), 1);
        let err = closed[0].error().expect("Connection should have failed");
        assert!(err.is_connect_failure(), "unexpected error: {err}");
        assert!(event_loop.is_empty());
    }

    #[test]
    fn test_three_hosts_one_success_two_failures() {
        let serving = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let serving_port = serving.local_addr().expect("Failed to get local address").port();

        let silent = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let silent_port = silent.local_addr().expect("Failed to get local address").port();

        let refused_port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
            listener.local_addr().expect("Failed to get local address").port()
        };

        let handle = thread::spawn(move || {
            let (mut stream, _) = serving.accept().expect("Failed to accept connection");
            read_request(&mut stream);
            stream.write_all(b"hello").expect("Failed to write to stream");
        });

        let mut event_loop = EventLoop::new(Config::default()).expect("Failed to create loop");
        let ok = event_loop.open("127.0.0.1", serving_port).expect("Failed to open");
        let refused = event_loop.open("127.0.0.1", refused_port).expect("Failed to open");
        let timed_out = event_loop
            .open_with_timeout("127.0.0.1", silent_port, Some(Duration::ZERO))
            .expect("Failed to open");

        let closed = event_loop.run().expect("Loop failed");
        handle.join().expect("Thread panicked");
        drop(silent);

        assert_eq!(closed.len(), 3);
        assert_eq!(closed.iter().filter(|c| c.is_success()).count(), 1);
        assert_eq!(closed.iter().filter(|c| c.error().is_some()).count(), 2);

        for connection in &closed {
            if connection.id == ok {
                assert_eq!(connection.received_text(), "hello");
            } else if connection.id == refused {
                let err = connection.error().expect("Refused connect should fail");
                assert!(matches!(err, Error::Connect { .. }));
                assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionRefused));
            } else {
                assert_eq!(connection.id, timed_out);
                assert!(matches!(
                    connection.reason,
                    CloseReason::Failed(Error::ConnectTimeout { .. })
                ));
            }
        }

        assert!(event_loop.is_empty());
    }

    #[test]
    fn test_chunked_reply_accumulates_exactly_once() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener.local_addr().expect("Failed to get local address").port();

        let chunks: Vec<Vec<u8>> = (0u8..12).map(|i| vec![b'a' + i; usize::from(i) + 1]).collect();
        let expected: Vec<u8> = chunks.concat();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            read_request(&mut stream);

            for chunk in chunks {
                stream.write_all(&chunk).expect("Failed to write to stream");
                thread::sleep(Duration::from_millis(2));
            }
        });

        let config = Config::new().read_buffer_size(3);
        let mut event_loop = EventLoop::new(config).expect("Failed to create loop");
        event_loop.open("localhost", port).expect("Failed to open");

        let closed = event_loop.run().expect("Loop failed");
        handle.join().expect("Thread panicked");

        assert_eq!(closed.len(), 1);
        assert!(closed[0].is_success());
        assert_eq!(closed[0].host.as_deref(), Some("localhost"));
        assert_eq!(closed[0].received, expected);
    }

    #[test]
    fn test_inbound_limit_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener.local_addr().expect("Failed to get local address").port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            read_request(&mut stream);
            let _ = stream.write_all(&[b'z'; 64]);
        });

        let config = Config::new().max_inbound_bytes(16).read_buffer_size(8);
        let mut event_loop = EventLoop::new(config).expect("Failed to create loop");
        event_loop.open("127.0.0.1", port).expect("Failed to open");

        let closed = event_loop.run().expect("Loop failed");
        handle.join().expect("Thread panicked");

        assert_eq!(closed.len(), 1);
        assert!(matches!(
            closed[0].error(),
            Some(Error::InboundLimit { limit: 16, .. })
        ));
        assert!(closed[0].received.len() <= 16);
    }

    #[test]
    fn test_unresolvable_host_is_rejected_by_open() {
        let mut event_loop = EventLoop::new(Config::default()).expect("Failed to create loop");

        let err = event_loop
            .open("no-such-host.invalid", 9527)
            .expect_err("Resolution should fail");

        assert!(matches!(err, Error::Resolve { .. }));
        assert!(event_loop.is_empty());
    }
}
