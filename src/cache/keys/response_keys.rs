/// 响应缓存键前缀
const RESPONSE_CACHE_PREFIX: &str = "cache:";

/// 按参数名排序查询串，保证参数顺序不同的同一请求得到相同的键
///
/// 同名参数保持原有的相对顺序。
pub fn sorted_query(query: Option<&str>) -> String {
    let Some(query) = query else {
        return String::new();
    };

    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_by(|a, b| param_name(a).cmp(param_name(b)));
    pairs.join("&")
}

fn param_name(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(name, _)| name)
}

/// 键中各段内的 `%` 和 `:` 转义，分隔符 `:` 只出现在段之间
fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}

/// 生成响应缓存键: `cache:{method}:{path}:{sorted query}:{user id}`
pub fn response_cache_key(
    method: &str,
    path: &str,
    query: Option<&str>,
    user_id: &str,
) -> String {
    format!(
        "{}{}:{}:{}:{}",
        RESPONSE_CACHE_PREFIX,
        escape_segment(method),
        escape_segment(path),
        escape_segment(&sorted_query(query)),
        escape_segment(user_id)
    )
}
