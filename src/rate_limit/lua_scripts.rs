/// Lua script for fixed window rate limiting in Redis
///
/// Check and increment happen in one script so concurrent callers can never
/// push the counter past capacity.
///
/// KEYS[1] = the window counter key (`rl:<key>:<window_start_ms>`)
/// ARGV[1] = permits requested
/// ARGV[2] = time left in the window (milliseconds), used as the counter TTL
/// ARGV[3] = capacity
///
/// Returns: the new counter value, or -1 when the request is rejected
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local permits = tonumber(ARGV[1])
local ttl_ms = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])

if not current then
    if permits <= capacity then
        redis.call('SET', KEYS[1], permits, 'PX', ttl_ms)
        return permits
    end
    return -1
end

local total = tonumber(current) + permits
if total <= capacity then
    redis.call('INCRBY', KEYS[1], permits)
    return total
end

-- Over capacity: leave the counter untouched
return -1
"#;

/// Whether a reply from [`FIXED_WINDOW_SCRIPT`] grants the request
///
/// Granted replies are the new counter value, which is at least the permits
/// requested; rejections are -1.
pub fn fixed_window_granted(reply: i64) -> bool {
    reply > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Same steps as the script, against an in-memory keyspace
    #[derive(Default)]
    struct Keyspace {
        values: HashMap<String, i64>,
    }

    impl Keyspace {
        fn eval(&mut self, key: &str, permits: i64, capacity: i64) -> i64 {
            match self.values.get(key).copied() {
                None => {
                    if permits <= capacity {
                        self.values.insert(key.to_string(), permits);
                        return permits;
                    }
                    -1
                }
                Some(current) => {
                    let total = current + permits;
                    if total <= capacity {
                        self.values.insert(key.to_string(), total);
                        return total;
                    }
                    -1
                }
            }
        }
    }

    #[test]
    fn test_script_shape() {
        assert!(FIXED_WINDOW_SCRIPT.contains("redis.call('GET', KEYS[1])"));
        assert!(FIXED_WINDOW_SCRIPT.contains("'PX', ttl_ms"));
        assert!(FIXED_WINDOW_SCRIPT.contains("redis.call('INCRBY', KEYS[1], permits)"));
        assert!(!FIXED_WINDOW_SCRIPT.contains("EXPIRE"));
    }

    #[test]
    fn test_first_touch() {
        let mut keyspace = Keyspace::default();

        let reply = keyspace.eval("a", 3, 3);
        assert_eq!(reply, 3);
        assert!(fixed_window_granted(reply));

        let reply = keyspace.eval("b", 4, 3);
        assert_eq!(reply, -1);
        assert!(!fixed_window_granted(reply));
        assert!(!keyspace.values.contains_key("b"));
    }

    #[test]
    fn test_rejection_leaves_counter_untouched() {
        let mut keyspace = Keyspace::default();

        assert_eq!(keyspace.eval("k", 2, 5), 2);
        assert_eq!(keyspace.eval("k", 4, 5), -1);
        assert_eq!(keyspace.values["k"], 2);

        // The remaining headroom is still usable after a rejection
        assert_eq!(keyspace.eval("k", 3, 5), 5);
        assert_eq!(keyspace.eval("k", 1, 5), -1);
    }

    #[test]
    fn test_granted_replies_stay_within_capacity() {
        let mut keyspace = Keyspace::default();
        let capacity = 7;

        for permits in [1, 2, 3, 1, 2, 1, 1] {
            let reply = keyspace.eval("k", permits, capacity);
            if fixed_window_granted(reply) {
                assert!(reply >= permits && reply <= capacity);
            } else {
                assert_eq!(reply, -1);
            }
        }

        assert_eq!(keyspace.values["k"], capacity);
    }

    #[test]
    fn test_serialized_callers_get_exactly_capacity() {
        // Redis runs one script at a time; the lock plays that role here
        let keyspace = Arc::new(Mutex::new(Keyspace::default()));
        let capacity = 20;

        let granted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..capacity + 1)
                .map(|_| {
                    let keyspace = keyspace.clone();
                    scope.spawn(move || fixed_window_granted(keyspace.lock().eval("k", 1, capacity)))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|granted| *granted)
                .count()
        });

        assert_eq!(granted, capacity as usize);
        assert_eq!(keyspace.lock().values["k"], capacity);
    }

    #[test]
    fn test_granted_mapping() {
        assert!(fixed_window_granted(1));
        assert!(fixed_window_granted(i64::from(u32::MAX)));
        assert!(!fixed_window_granted(-1));
        assert!(!fixed_window_granted(0));
    }
}
