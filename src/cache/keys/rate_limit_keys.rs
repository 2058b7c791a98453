/// 限流计数键前缀
const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// 生成限流计数键，由客户端地址、请求方法和路径组成
pub fn rate_limit_key(client: &str, method: &str, path: &str) -> String {
    format!("{}{}:{}:{}", RATE_LIMIT_PREFIX, client, method, path)
}
