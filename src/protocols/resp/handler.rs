//! RESP command dispatch.
//!
//! Turns a decoded request frame into a command, runs it against the
//! storage backend and produces the reply frame. No I/O happens here.

use super::parser::Frame;
use crate::storage::Storage;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;

/// RESP command types
#[derive(Debug, PartialEq)]
enum RespCommand {
    Ping,
    Echo { message: Bytes },
    Get { key: Bytes },
    Set { key: Bytes, value: Bytes, ttl: Option<Duration> },
    Command, // Redis COMMAND command (for client compatibility)
}

/// Routes commands to the shared storage
pub struct RespHandler {
    storage: Arc<Storage>,
}

impl RespHandler {
    pub fn new(storage: Arc<Storage>) -> Self {
        RespHandler { storage }
    }

    /// Handle one request frame and return exactly one reply frame.
    ///
    /// Malformed requests (not an array, empty, nested arrays as arguments)
    /// produce an error reply; they never end the connection.
    pub fn dispatch(&self, frame: Frame) -> Frame {
        let frames = match frame {
            Frame::Array(frames) => frames,
            _ => return Frame::error("ERR Protocol error: expected array"),
        };

        let mut parts = Vec::with_capacity(frames.len());
        for frame in &frames {
            match frame.payload() {
                Some(payload) => parts.push(payload),
                None => return Frame::error("ERR Protocol error: expected string arguments"),
            }
        }

        let Some((name, args)) = parts.split_first() else {
            return Frame::error("ERR empty command");
        };

        self.route(&String::from_utf8_lossy(name), args)
    }

    /// Run the named command with positional arguments
    pub fn route(&self, name: &str, args: &[Bytes]) -> Frame {
        match parse_command(name, args) {
            Ok(cmd) => self.execute(cmd),
            Err(msg) => Frame::error(msg),
        }
    }

    /// Execute a command and return the response frame
    fn execute(&self, cmd: RespCommand) -> Frame {
        match cmd {
            RespCommand::Ping => Frame::simple("PONG"),

            RespCommand::Echo { message } => Frame::bulk(message),

            RespCommand::Get { key } => match self.storage.get(&key) {
                Some(value) => Frame::bulk(value),
                None => Frame::null(),
            },

            RespCommand::Set { key, value, ttl } => {
                self.storage.set(key, value, ttl);
                Frame::simple("OK")
            }

            // Empty array keeps redis-cli happy on connect
            RespCommand::Command => Frame::array(vec![]),
        }
    }
}

/// Parse a command from its name and arguments.
///
/// Every argument check happens here, before the storage is touched.
fn parse_command(name: &str, args: &[Bytes]) -> Result<RespCommand, String> {
    match name.to_ascii_uppercase().as_str() {
        "PING" => Ok(RespCommand::Ping),

        "ECHO" => {
            if args.is_empty() {
                return Err(wrong_arity(name));
            }
            Ok(RespCommand::Echo {
                message: join_with_spaces(args),
            })
        }

        "GET" => {
            if args.is_empty() {
                return Err(wrong_arity(name));
            }
            Ok(RespCommand::Get {
                key: args[0].clone(),
            })
        }

        "SET" => {
            if args.len() < 2 {
                return Err(wrong_arity(name));
            }
            let ttl = match &args[2..] {
                [] => None,
                [seconds] => Some(Duration::from_secs(parse_expire(seconds)?)),
                [opt, amount] if opt.eq_ignore_ascii_case(b"EX") => {
                    Some(Duration::from_secs(parse_expire(amount)?))
                }
                [opt, amount] if opt.eq_ignore_ascii_case(b"PX") => {
                    Some(Duration::from_millis(parse_expire(amount)?))
                }
                _ => return Err("ERR syntax error".to_string()),
            };
            Ok(RespCommand::Set {
                key: args[0].clone(),
                value: args[1].clone(),
                ttl,
            })
        }

        "COMMAND" => Ok(RespCommand::Command),

        _ => Err(format!("ERR unknown command '{name}'")),
    }
}

fn wrong_arity(name: &str) -> String {
    format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    )
}

/// Parse a non-negative expire amount
fn parse_expire(raw: &[u8]) -> Result<u64, String> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| "ERR value is not an integer or out of range".to_string())
}

/// Join arguments with single spaces
fn join_with_spaces(args: &[Bytes]) -> Bytes {
    if let [only] = args {
        return only.clone();
    }
    let mut joined = BytesMut::with_capacity(args.iter().map(|a| a.len() + 1).sum());
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            joined.extend_from_slice(b" ");
        }
        joined.extend_from_slice(arg);
    }
    joined.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn handler() -> (RespHandler, Arc<Storage>) {
        let storage = Storage::new();
        (RespHandler::new(Arc::clone(&storage)), storage)
    }

    fn request(parts: &[&str]) -> Frame {
        Frame::array(
            parts
                .iter()
                .map(|p| Frame::bulk(Bytes::copy_from_slice(p.as_bytes())))
                .collect(),
        )
    }

    fn reply(handler: &RespHandler, parts: &[&str]) -> Vec<u8> {
        handler.dispatch(request(parts)).encode().to_vec()
    }

    #[test]
    fn test_ping_any_casing() {
        let (handler, _) = handler();
        for name in ["ping", "PING", "PiNg"] {
            assert_eq!(reply(&handler, &[name]), b"+PONG\r\n");
        }
    }

    #[test]
    fn test_ping_ignores_arguments() {
        let (handler, _) = handler();
        assert_eq!(reply(&handler, &["PING", "hello"]), b"+PONG\r\n");
    }

    #[test]
    fn test_echo_single_emission() {
        let (handler, _) = handler();
        assert_eq!(reply(&handler, &["ECHO", "hello"]), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_echo_joins_arguments() {
        let (handler, _) = handler();
        assert_eq!(
            reply(&handler, &["echo", "hello", "big", "world"]),
            b"$15\r\nhello big world\r\n"
        );
    }

    #[test]
    fn test_echo_requires_argument() {
        let (handler, _) = handler();
        assert_eq!(
            reply(&handler, &["ECHO"]),
            b"-ERR wrong number of arguments for 'echo' command\r\n"
        );
    }

    #[test]
    fn test_set_then_get() {
        let (handler, _) = handler();
        assert_eq!(reply(&handler, &["SET", "k", "v"]), b"+OK\r\n");
        assert_eq!(reply(&handler, &["GET", "k"]), b"$1\r\nv\r\n");
    }

    #[test]
    fn test_get_missing_is_null() {
        let (handler, _) = handler();
        assert_eq!(reply(&handler, &["GET", "missing"]), b"$-1\r\n");
    }

    #[test]
    fn test_get_requires_key() {
        let (handler, _) = handler();
        assert_eq!(
            reply(&handler, &["GET"]),
            b"-ERR wrong number of arguments for 'get' command\r\n"
        );
    }

    #[test]
    fn test_set_arity_guard_leaves_store_untouched() {
        let (handler, storage) = handler();
        assert_eq!(
            reply(&handler, &["SET", "k"]),
            b"-ERR wrong number of arguments for 'set' command\r\n"
        );
        assert_eq!(storage.len(), 0);
        assert_eq!(reply(&handler, &["GET", "k"]), b"$-1\r\n");
    }

    #[test]
    fn test_set_with_invalid_ttl_leaves_store_untouched() {
        let (handler, storage) = handler();
        let not_an_integer = b"-ERR value is not an integer or out of range\r\n";
        assert_eq!(reply(&handler, &["SET", "k", "v", "soon"]), not_an_integer);
        assert_eq!(reply(&handler, &["SET", "k", "v", "-5"]), not_an_integer);
        assert_eq!(reply(&handler, &["SET", "k", "v", "EX", "x"]), not_an_integer);
        assert_eq!(
            reply(&handler, &["SET", "k", "v", "KEEPTTL", "1"]),
            b"-ERR syntax error\r\n"
        );
        assert_eq!(
            reply(&handler, &["SET", "k", "v", "EX", "1", "NX"]),
            b"-ERR syntax error\r\n"
        );
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_set_ttl_forms() {
        let clock = Arc::new(ManualClock::new());
        let storage = Storage::with_clock(clock.clone());
        let handler = RespHandler::new(storage);

        assert_eq!(reply(&handler, &["SET", "positional", "v", "1"]), b"+OK\r\n");
        assert_eq!(reply(&handler, &["SET", "ex", "v", "ex", "1"]), b"+OK\r\n");
        assert_eq!(reply(&handler, &["SET", "px", "v", "PX", "1500"]), b"+OK\r\n");
        assert_eq!(reply(&handler, &["SET", "forever", "v", "0"]), b"+OK\r\n");

        clock.advance(Duration::from_secs(1));
        assert_eq!(reply(&handler, &["GET", "positional"]), b"$-1\r\n");
        assert_eq!(reply(&handler, &["GET", "ex"]), b"$-1\r\n");
        assert_eq!(reply(&handler, &["GET", "px"]), b"$1\r\nv\r\n");

        clock.advance(Duration::from_millis(500));
        assert_eq!(reply(&handler, &["GET", "px"]), b"$-1\r\n");

        clock.advance(Duration::from_secs(1_000_000));
        assert_eq!(reply(&handler, &["GET", "forever"]), b"$1\r\nv\r\n");
    }

    #[test]
    fn test_set_with_largest_ttl() {
        let clock = Arc::new(ManualClock::new());
        let storage = Storage::with_clock(clock.clone());
        let handler = RespHandler::new(Arc::clone(&storage));
        let max = u64::MAX.to_string();
        let max = max.as_str();

        assert_eq!(reply(&handler, &["SET", "positional", "v", max]), b"+OK\r\n");
        assert_eq!(reply(&handler, &["SET", "ex", "v", "EX", max]), b"+OK\r\n");
        assert_eq!(reply(&handler, &["SET", "px", "v", "PX", max]), b"+OK\r\n");
        assert_eq!(storage.len(), 3);

        clock.advance(Duration::from_secs(1_000_000));
        for key in ["positional", "ex", "px"] {
            assert_eq!(reply(&handler, &["GET", key]), b"$1\r\nv\r\n");
        }

        // One past the range is still rejected
        assert_eq!(
            reply(&handler, &["SET", "k", "v", "18446744073709551616"]),
            b"-ERR value is not an integer or out of range\r\n"
        );
        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn test_unknown_command_keeps_original_name() {
        let (handler, _) = handler();
        assert_eq!(
            reply(&handler, &["FlushAll"]),
            b"-ERR unknown command 'FlushAll'\r\n"
        );
    }

    #[test]
    fn test_command_returns_empty_array() {
        let (handler, _) = handler();
        assert_eq!(reply(&handler, &["COMMAND", "DOCS"]), b"*0\r\n");
    }

    #[test]
    fn test_simple_string_arguments() {
        let (handler, _) = handler();
        let frame = Frame::array(vec![
            Frame::simple("SET"),
            Frame::simple("k"),
            Frame::bulk(Bytes::from_static(b"v")),
        ]);
        assert_eq!(handler.dispatch(frame), Frame::simple("OK"));
        assert_eq!(
            handler.dispatch(Frame::array(vec![Frame::simple("GET"), Frame::simple("k")])),
            Frame::bulk(Bytes::from_static(b"v"))
        );
    }

    #[test]
    fn test_binary_safe_values() {
        let (handler, _) = handler();
        let value = Bytes::from_static(b"\x00\r\n\xff");
        let set = Frame::array(vec![
            Frame::bulk(Bytes::from_static(b"SET")),
            Frame::bulk(Bytes::from_static(b"bin")),
            Frame::bulk(value.clone()),
        ]);
        assert_eq!(handler.dispatch(set), Frame::simple("OK"));
        assert_eq!(
            handler.dispatch(request(&["GET", "bin"])),
            Frame::bulk(value)
        );
    }

    #[test]
    fn test_malformed_requests_are_error_replies() {
        let (handler, _) = handler();
        assert!(matches!(
            handler.dispatch(Frame::simple("PING")),
            Frame::Error(_)
        ));
        assert_eq!(
            handler.dispatch(Frame::array(vec![])),
            Frame::error("ERR empty command")
        );
        assert!(matches!(
            handler.dispatch(Frame::array(vec![
                Frame::simple("ECHO"),
                Frame::array(vec![]),
            ])),
            Frame::Error(_)
        ));
    }

    #[test]
    fn test_route_directly() {
        let (handler, _) = handler();
        assert_eq!(handler.route("ping", &[]), Frame::simple("PONG"));
        assert_eq!(
            handler.route("echo", &[Bytes::from_static(b"a"), Bytes::from_static(b"b")]),
            Frame::bulk(Bytes::from_static(b"a b"))
        );
    }
}
