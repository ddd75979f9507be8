/// Router Module Index
///
/// Routes are grouped by who may reach them. The grouping decides which
/// layers wrap a route; role checks beyond "is authenticated" happen inside
/// the handlers through `access::authorize`.
///
/// Every group is mounted under `/api` by `create_router`.

/// Routes reachable without a token: health check and login.
pub mod public;

/// Routes behind the `AuthUser` middleware. Most resources live here and
/// apply role and resource scoping per handler.
pub mod authenticated;

/// Administrative endpoints with no non-admin counterpart on the same path
/// (statistics, bulk imports, file cleanup). Also behind the `AuthUser`
/// middleware.
pub mod admin;

/// Prefixes reported by the 404 fallback.
pub const AVAILABLE_ROUTES: &[&str] = &[
    "/api/health",
    "/api/auth",
    "/api/users",
    "/api/departments",
    "/api/subjects",
    "/api/analytics",
    "/api/upload",
    "/api/files",
    "/swagger-ui",
];
