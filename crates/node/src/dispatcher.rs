//! Command dispatch
//!
//! Parses the command name case-insensitively, validates arity and
//! argument types, invokes the store, and maps results and errors onto
//! RESP replies. NotFound is a value (null bulk / `:0`), never an error.

use cachegrid_core::Error;
use cachegrid_store::TtlState;
use cachegrid_wire::Reply;
use std::time::Duration;

use crate::engine::Engine;

/// Execute one command against the engine.
pub fn dispatch(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.is_empty() {
        return Reply::err("empty command");
    }
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match name.as_str() {
        "PING" => ping(args),
        "SET" => set(engine, args),
        "GET" => get(engine, args),
        "DEL" => del(engine, args),
        "EXISTS" => exists(engine, args),
        "EXPIRE" => expire(engine, args),
        "TTL" => ttl(engine, args),
        "FLUSH" => flush(engine, args),
        "ZADD" => zadd(engine, args),
        "ZREM" => zrem(engine, args),
        "ZSCORE" => zscore(engine, args),
        "ZRANK" => zrank(engine, args, false),
        "ZREVRANK" => zrank(engine, args, true),
        "ZRANGE" => zrange(engine, args, false),
        "ZREVRANGE" => zrange(engine, args, true),
        "ZCARD" => zcard(engine, args),
        "KEYS" => keys(engine, args),
        "SIZE" => size(engine, args),
        "INFO" | "STATS" => info(engine, args),
        _ => Reply::Error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

/// Map a store error onto its wire form.
fn error_reply(err: Error) -> Reply {
    match err {
        Error::WrongType { .. } => Reply::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
        ),
        Error::Durability { .. } => Reply::Error("ERR durability failure".to_string()),
        Error::Capacity { .. } => Reply::Error("ERR oom".to_string()),
        other => Reply::err(other),
    }
}

fn arity_error(command: &str) -> Reply {
    Reply::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_ascii_lowercase()
    ))
}

fn parse_u64(bytes: &[u8]) -> Result<u64, Reply> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Reply::err("value is not an integer or out of range"))
}

fn parse_i64(bytes: &[u8]) -> Result<i64, Reply> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Reply::err("value is not an integer or out of range"))
}

fn parse_score(bytes: &[u8]) -> Result<f64, Reply> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite())
        .ok_or_else(|| Reply::err("value is not a valid float"))
}

/// Render a score the way Redis does: integral scores drop the fraction.
pub fn format_score(score: f64) -> String {
    if score == score.trunc() && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn ping(args: &[Vec<u8>]) -> Reply {
    match args.len() {
        1 => Reply::pong(),
        2 => Reply::Bulk(args[1].clone()),
        _ => arity_error("ping"),
    }
}

fn set(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    let ttl = match args.len() {
        3 => None,
        5 if args[3].eq_ignore_ascii_case(b"EX") => {
            let seconds = match parse_u64(&args[4]) {
                Ok(0) => return Reply::err("invalid expire time in 'set' command"),
                Ok(seconds) => seconds,
                Err(reply) => return reply,
            };
            Some(Duration::from_secs(seconds))
        }
        5 => return Reply::err("syntax error"),
        _ => return arity_error("set"),
    };
    match engine.store().set(&args[1], args[2].clone(), ttl) {
        Ok(()) => Reply::ok(),
        Err(err) => error_reply(err),
    }
}

fn get(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 2 {
        return arity_error("get");
    }
    match engine.store().get(&args[1]) {
        Ok(Some(value)) => Reply::Bulk(value),
        Ok(None) => Reply::Null,
        Err(err) => error_reply(err),
    }
}

fn del(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 2 {
        return arity_error("del");
    }
    match engine.store().del(&args[1]) {
        Ok(removed) => Reply::Integer(removed as i64),
        Err(err) => error_reply(err),
    }
}

fn exists(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 2 {
        return arity_error("exists");
    }
    match engine.store().exists(&args[1]) {
        Ok(found) => Reply::Integer(found as i64),
        Err(err) => error_reply(err),
    }
}

fn expire(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 3 {
        return arity_error("expire");
    }
    let seconds = match parse_u64(&args[2]) {
        Ok(seconds) => seconds,
        Err(reply) => return reply,
    };
    match engine
        .store()
        .expire(&args[1], Duration::from_secs(seconds))
    {
        Ok(applied) => Reply::Integer(applied as i64),
        Err(err) => error_reply(err),
    }
}

fn ttl(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 2 {
        return arity_error("ttl");
    }
    match engine.store().ttl(&args[1]) {
        Ok(TtlState::Missing) => Reply::Integer(-2),
        Ok(TtlState::NoExpiry) => Reply::Integer(-1),
        Ok(TtlState::Remaining(left)) => {
            // Round up so a key with 800ms left reports 1, not 0.
            Reply::Integer(left.as_millis().div_ceil(1000) as i64)
        }
        Err(err) => error_reply(err),
    }
}

fn flush(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 1 {
        return arity_error("flush");
    }
    match engine.store().flush() {
        Ok(()) => Reply::ok(),
        Err(err) => error_reply(err),
    }
}

fn zadd(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 4 {
        return arity_error("zadd");
    }
    let score = match parse_score(&args[2]) {
        Ok(score) => score,
        Err(reply) => return reply,
    };
    match engine.store().zadd(&args[1], &args[3], score) {
        Ok(added) => Reply::Integer(added as i64),
        Err(err) => error_reply(err),
    }
}

fn zrem(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 3 {
        return arity_error("zrem");
    }
    match engine.store().zrem(&args[1], &args[2]) {
        Ok(removed) => Reply::Integer(removed as i64),
        Err(err) => error_reply(err),
    }
}

fn zscore(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 3 {
        return arity_error("zscore");
    }
    match engine.store().zscore(&args[1], &args[2]) {
        Ok(Some(score)) => Reply::Bulk(format_score(score).into_bytes()),
        Ok(None) => Reply::Null,
        Err(err) => error_reply(err),
    }
}

fn zrank(engine: &Engine, args: &[Vec<u8>], reverse: bool) -> Reply {
    if args.len() != 3 {
        return arity_error(if reverse { "zrevrank" } else { "zrank" });
    }
    let result = if reverse {
        engine.store().zrevrank(&args[1], &args[2])
    } else {
        engine.store().zrank(&args[1], &args[2])
    };
    match result {
        Ok(Some(rank)) => Reply::Integer(rank as i64),
        Ok(None) => Reply::Null,
        Err(err) => error_reply(err),
    }
}

fn zrange(engine: &Engine, args: &[Vec<u8>], reverse: bool) -> Reply {
    if args.len() != 4 {
        return arity_error(if reverse { "zrevrange" } else { "zrange" });
    }
    let start = match parse_i64(&args[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let stop = match parse_i64(&args[3]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let result = if reverse {
        engine.store().zrevrange(&args[1], start, stop)
    } else {
        engine.store().zrange(&args[1], start, stop)
    };
    match result {
        Ok(members) => Reply::Array(members.into_iter().map(Reply::Bulk).collect()),
        Err(err) => error_reply(err),
    }
}

fn zcard(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 2 {
        return arity_error("zcard");
    }
    match engine.store().zcard(&args[1]) {
        Ok(count) => Reply::Integer(count as i64),
        Err(err) => error_reply(err),
    }
}

fn keys(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    let pattern = match args.len() {
        1 => None,
        2 => Some(args[1].as_slice()),
        _ => return arity_error("keys"),
    };
    let keys = engine.store().keys(pattern);
    Reply::Array(keys.into_iter().map(Reply::Bulk).collect())
}

fn size(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() != 1 {
        return arity_error("size");
    }
    Reply::Integer(engine.store().size() as i64)
}

fn info(engine: &Engine, args: &[Vec<u8>]) -> Reply {
    if args.len() > 2 {
        return arity_error("info");
    }
    Reply::Bulk(engine.info_text().into_bytes())
}
