/// Lua script for the atomic upsert-increment of one counter row.
///
/// The key already encodes the window start, so a plain INCR is the whole
/// upsert: the first request in a window creates the row at 1, later
/// requests increment it. The expiry is attached on creation so stale
/// windows age out of Redis on their own.
///
/// KEYS[1] = the counter key
/// ARGV[1] = time-to-live in seconds
///
/// Returns: the count after the increment
pub const COUNTER_INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])

if count == 1 then
    redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]))
end

return count
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_well_formed() {
        assert!(COUNTER_INCREMENT_SCRIPT.contains("INCR"));
        assert!(COUNTER_INCREMENT_SCRIPT.contains("EXPIRE"));
    }
}
