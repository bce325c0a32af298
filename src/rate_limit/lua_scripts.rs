/// Lua script for the sliding window log
///
/// Prunes, appends, counts and refreshes expiry in one atomic step.
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = current timestamp (milliseconds)
/// ARGV[2] = window duration (milliseconds)
/// ARGV[3] = unique member for this request
///
/// Returns: number of entries in the window, including this request
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local member = ARGV[3]

-- Remove entries at or before the window start
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

-- Record this request
redis.call('ZADD', key, now, member)

local count = redis.call('ZCARD', key)
redis.call('PEXPIRE', key, window)

return count
"#;

/// Lua script for fixed window counting
///
/// KEYS[1] = the windowed rate limit key
/// ARGV[1] = window duration (seconds)
///
/// Returns: the counter value after incrementing
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])

local current = redis.call('INCR', key)

-- Only set the expiry once per bucket
if redis.call('TTL', key) == -1 then
    redis.call('EXPIRE', key, window)
end

return current
"#;

/// Lua script for token bucket rate limiting
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = bucket capacity
/// ARGV[2] = refill rate (tokens per second)
/// ARGV[3] = current timestamp (milliseconds)
/// ARGV[4] = expiry for idle buckets (seconds)
///
/// Returns: [allowed (0/1), remaining tokens as a string]
///
/// Tokens are returned as a string because Redis truncates Lua numbers to
/// integers in replies.
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])

-- Start with a full bucket
if tokens == nil or last_refill == nil then
    tokens = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill) / 1000
tokens = math.min(capacity, tokens + elapsed * refill_rate)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'last_refill', math.max(now, last_refill))
redis.call('EXPIRE', key, ttl)

return {allowed, tostring(tokens)}
"#;

