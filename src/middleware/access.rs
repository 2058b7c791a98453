use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::auth::AuthContext;
use crate::{AppState, error::AppError};

/// 路由要求的访问能力
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    /// 持有任一角色即可
    AnyRole(Vec<String>),
}

impl Access {
    pub fn roles(roles: &[&str]) -> Self {
        Access::AnyRole(roles.iter().map(|role| role.to_string()).collect())
    }
}

/// 路由表中的一条规则，`{param}` 形式的路径段匹配任意非空段
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub method: Option<Method>,
    pub pattern: String,
    pub access: Access,
    pub require_mfa: bool,
}

impl RouteRule {
    fn matches(&self, method: &Method, path: &str) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }

        let mut pattern = self.pattern.split('/').filter(|s| !s.is_empty());
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        loop {
            match (pattern.next(), segments.next()) {
                (None, None) => return true,
                (Some(p), Some(s)) => {
                    let is_param = p.starts_with('{') && p.ends_with('}');
                    if !is_param && p != s {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

/// 启动时构建的路由访问表，未登记的路由使用默认规则
#[derive(Debug, Clone)]
pub struct AccessTable {
    rules: Vec<RouteRule>,
    fallback: RouteRule,
}

impl Default for AccessTable {
    fn default() -> Self {
        Self::new(Access::Authenticated)
    }
}

impl AccessTable {
    pub fn new(fallback: Access) -> Self {
        Self {
            rules: Vec::new(),
            fallback: RouteRule {
                method: None,
                pattern: "*".to_string(),
                access: fallback,
                require_mfa: false,
            },
        }
    }

    /// 控制面自身路由的访问规则
    pub fn standard() -> Self {
        Self::default()
            .route(Method::GET, "/health", Access::Public)
            .route(Method::GET, "/auth/me", Access::Authenticated)
            .route(Method::GET, "/auth/mfa/status", Access::Authenticated)
            // 已启用 MFA 的用户重新绑定或关闭都需要当前验证码
            .sensitive(Method::POST, "/auth/mfa/setup", Access::Authenticated)
            .sensitive(Method::POST, "/auth/mfa/verify", Access::Authenticated)
            .sensitive(Method::POST, "/auth/mfa/disable", Access::Authenticated)
    }

    pub fn route(mut self, method: Method, pattern: &str, access: Access) -> Self {
        self.rules.push(RouteRule {
            method: Some(method),
            pattern: pattern.to_string(),
            access,
            require_mfa: false,
        });
        self
    }

    /// 登记需要 MFA 的敏感路由
    pub fn sensitive(mut self, method: Method, pattern: &str, access: Access) -> Self {
        self.rules.push(RouteRule {
            method: Some(method),
            pattern: pattern.to_string(),
            access,
            require_mfa: true,
        });
        self
    }

    pub fn rule_for(&self, method: &Method, path: &str) -> &RouteRule {
        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .unwrap_or(&self.fallback)
    }
}

/// 按路由表检查访问权限，并把匹配到的规则写入请求扩展供后续阶段使用
pub async fn authorize(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let rule = state.access.rule_for(req.method(), req.uri().path()).clone();
    let context = req.extensions().get::<AuthContext>();

    let denied = match (&rule.access, context) {
        (Access::Public, _) => None,
        (_, None) => Some(AppError::Unauthorized),
        (Access::Authenticated, Some(_)) => None,
        (Access::AnyRole(roles), Some(ctx)) if ctx.has_any_role(roles) => None,
        (Access::AnyRole(_), Some(_)) => Some(AppError::Forbidden),
    };

    if let Some(error) = denied {
        tracing::debug!(
            method = %req.method(),
            path = req.uri().path(),
            "Access denied: {}",
            error
        );
        return error.into_response();
    }

    req.extensions_mut().insert(rule);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_match_parameter_segments() {
        let table = AccessTable::default()
            .route(Method::GET, "/estudantes/{id}", Access::roles(&["secretaria"]))
            .route(Method::GET, "/estudantes", Access::Authenticated);

        let rule = table.rule_for(&Method::GET, "/estudantes/42");
        assert_eq!(rule.access, Access::roles(&["secretaria"]));

        let rule = table.rule_for(&Method::GET, "/estudantes/");
        assert_eq!(rule.pattern, "/estudantes");

        // 方法不同时落到默认规则
        let rule = table.rule_for(&Method::DELETE, "/estudantes/42");
        assert_eq!(rule.pattern, "*");
        assert_eq!(rule.access, Access::Authenticated);
    }

    #[test]
    fn extra_segments_do_not_match() {
        let table = AccessTable::new(Access::Public).route(Method::GET, "/health", Access::Public);
        assert_eq!(table.rule_for(&Method::GET, "/health/deep").pattern, "*");
    }

    #[test]
    fn standard_table_marks_mfa_changes_as_sensitive() {
        let table = AccessTable::standard();
        for path in ["/auth/mfa/setup", "/auth/mfa/verify", "/auth/mfa/disable"] {
            assert!(table.rule_for(&Method::POST, path).require_mfa, "{}", path);
        }
        assert!(!table.rule_for(&Method::GET, "/auth/mfa/status").require_mfa);
        assert_eq!(table.rule_for(&Method::GET, "/health").access, Access::Public);
    }

    #[test]
    fn role_check_needs_any_listed_role() {
        let ctx = AuthContext::new("u1", vec!["professor".to_string()]);
        assert!(ctx.has_any_role(&["secretaria".to_string(), "professor".to_string()]));
        assert!(!ctx.has_any_role(&["secretaria".to_string()]));
    }
}
