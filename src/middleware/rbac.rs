use crate::errors::GatewayError;
use crate::middleware::auth::Claims;

/// Role gate: the route's `required_roles` must intersect the caller's
/// claimed roles (§4.H). An empty `required_roles` list always passes, even
/// if `rbac` is listed among the route's middlewares.
pub fn enforce(required_roles: &[String], claims: Option<&Claims>) -> Result<(), GatewayError> {
    if required_roles.is_empty() {
        return Ok(());
    }

    let claims = claims.ok_or(GatewayError::Forbidden("No user claims found"))?;
    if claims.roles.is_empty() {
        return Err(GatewayError::Forbidden("User has no roles"));
    }

    let allowed = required_roles.iter().any(|r| claims.roles.contains(r));
    if allowed {
        Ok(())
    } else {
        Err(GatewayError::Forbidden("Insufficient permissions"))
    }
}
