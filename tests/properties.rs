#[cfg(test)]
mod tests {
    use muxloop::{Config, ConnectionId, EventLoop, Interest, Phase, Role, Source};
    use std::collections::HashSet;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::os::fd::AsRawFd;
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};

    const CONNECTIONS: usize = 4;

    /// Accepts `count` connections, reads each request and hangs up.
    fn spawn_peer(count: usize) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener.local_addr().expect("Failed to get local address").port();

        let handle = thread::spawn(move || {
            for _ in 0..count {
                let (mut stream, _) = listener.accept().expect("Failed to accept connection");
                let mut request = Vec::new();
                let mut byte = [0u8; 1];
                while !request.ends_with(b"\r\n\r\n") {
                    if stream.read(&mut byte).expect("Failed to read request") == 0 {
                        break;
                    }
                    request.push(byte[0]);
                }
            }
        });

        (port, handle)
    }

    /// Checks the registration invariants between two turns.
    fn assert_registrations_consistent(event_loop: &EventLoop) {
        let mux = event_loop.multiplexer();
        let mut fds = HashSet::new();

        for token in mux.tokens() {
            let connection = mux.get(token).expect("Listed token must be registered");
            let fd = connection.as_raw_fd();

            assert!(fds.insert(fd), "descriptor {fd} held by two records");
            assert_eq!(mux.token_of(fd), Some(token));

            let registered = mux.interest(token).expect("Listed token must have a mask");
            assert_eq!(registered, connection.interest());
            assert!(!registered.is_empty());
        }
    }

    #[test]
    fn test_registration_invariants_hold_between_turns() {
        let (port, handle) = spawn_peer(CONNECTIONS);

        let mut event_loop = EventLoop::new(Config::default()).expect("Failed to create loop");
        for _ in 0..CONNECTIONS {
            event_loop.open("127.0.0.1", port).expect("Failed to open");
        }

        assert_registrations_consistent(&event_loop);
        while event_loop.run_once().expect("Turn failed") {
            assert_registrations_consistent(&event_loop);
        }

        handle.join().expect("Thread panicked");
        assert_eq!(event_loop.take_closed().len(), CONNECTIONS);
    }

    #[test]
    fn test_closed_connections_never_come_back() {
        let (port, handle) = spawn_peer(CONNECTIONS);

        let mut event_loop = EventLoop::new(Config::default()).expect("Failed to create loop");
        let opened: HashSet<ConnectionId> = (0..CONNECTIONS)
            .map(|_| event_loop.open("127.0.0.1", port).expect("Failed to open"))
            .collect();
        assert_eq!(opened.len(), CONNECTIONS);

        let mut closed_ids = HashSet::new();
        while event_loop.run_once().expect("Turn failed") {
            for closed in event_loop.take_closed() {
                assert!(closed_ids.insert(closed.id), "{} closed twice", closed.id);
            }

            let mux = event_loop.multiplexer();
            for token in mux.tokens() {
                let id = mux.get(token).expect("Listed token must be registered").id();
                assert!(!closed_ids.contains(&id), "{id} registered after close");
            }
        }

        for closed in event_loop.take_closed() {
            assert!(closed_ids.insert(closed.id), "{} closed twice", closed.id);
        }

        handle.join().expect("Thread panicked");
        assert_eq!(closed_ids, opened);
    }

    #[test]
    fn test_connect_settles_before_write_in_the_same_turn() {
        let (port, handle) = spawn_peer(1);

        let mut event_loop = EventLoop::new(Config::default()).expect("Failed to create loop");
        event_loop.open("127.0.0.1", port).expect("Failed to open");

        while event_loop.run_once().expect("Turn failed") {
            let mux = event_loop.multiplexer();

            for token in mux.tokens() {
                let connection = mux.get(token).expect("Listed token must be registered");

                match connection.role() {
                    Role::Connecting => assert_eq!(connection.phase(), Phase::Connecting),
                    Role::Established => {
                        // The readiness that completed the connect also
                        // reported writability, so the request went out in
                        // the same turn.
                        assert_eq!(connection.phase(), Phase::AwaitingRead);
                        assert!(connection.pending_outbound().is_empty());
                    }
                    Role::Accepting => unreachable!("no listener was bound"),
                }
            }
        }

        handle.join().expect("Thread panicked");

        let closed = event_loop.take_closed();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].is_success());
    }

    #[test]
    fn test_registration_invariants_hold_for_a_listener() {
        let mut event_loop =
            EventLoop::new(Config::new().response("ok")).expect("Failed to create loop");
        let addr = event_loop
            .bind("127.0.0.1:0".parse().expect("Invalid address"))
            .expect("Failed to bind");

        let (tx, rx) = mpsc::channel();
        event_loop.on_close(move |closed| {
            tx.send(closed.id).expect("Failed to forward summary");
        });

        let listener = event_loop.multiplexer().tokens();
        assert_eq!(listener.len(), 1);
        let listener = listener[0];

        // One client at a time, so every accepted socket lands in the slot
        // the previous one freed.
        let clients = thread::spawn(move || {
            for _ in 0..CONNECTIONS {
                let mut stream = TcpStream::connect(addr).expect("Failed to connect to server");

                let mut greeting = [0u8; 2];
                stream
                    .read_exact(&mut greeting)
                    .expect("Failed to read response");

                stream.write_all(b"x").expect("Failed to write to stream");
                stream
                    .shutdown(Shutdown::Write)
                    .expect("Failed to shut down write side");

                let mut rest = Vec::new();
                stream
                    .read_to_end(&mut rest)
                    .expect("Failed to read until close");
            }
        });

        let mut accepted_tokens = HashSet::new();
        let mut closed = 0;

        assert_registrations_consistent(&event_loop);
        while closed < CONNECTIONS {
            assert!(event_loop.run_once().expect("Turn failed"));
            assert_registrations_consistent(&event_loop);

            let mux = event_loop.multiplexer();
            for token in mux.tokens() {
                let connection = mux.get(token).expect("Listed token must be registered");

                match connection.role() {
                    Role::Accepting => {
                        assert_eq!(token, listener);
                        assert_eq!(connection.interest(), Interest::ACCEPT);
                    }
                    Role::Established => {
                        accepted_tokens.insert(token);

                        let expected = match connection.phase() {
                            Phase::AwaitingWrite => Interest::READ | Interest::WRITE,
                            Phase::AwaitingRead => Interest::READ,
                            phase => panic!("accepted socket in {phase:?}"),
                        };
                        assert_eq!(connection.interest(), expected);
                    }
                    Role::Connecting => unreachable!("no connect was started"),
                }
            }

            closed += rx.try_iter().count();
        }

        clients.join().expect("Thread panicked");

        assert_eq!(accepted_tokens.len(), 1);
        assert!(!accepted_tokens.contains(&listener));
        assert_eq!(event_loop.multiplexer().tokens(), vec![listener]);
    }
}
