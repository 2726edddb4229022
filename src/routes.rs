//! Application locations and how they are classified.

use url::form_urlencoded;

use crate::session::UserRole;

pub const HOME: &str = "/";
pub const LOGIN: &str = "/login";
pub const REGISTER: &str = "/register";
pub const PRO_LOGIN: &str = "/pro/login";
pub const PRO_REGISTER: &str = "/pro/register";
pub const ADMIN_LOGIN: &str = "/admin/login";
pub const ACTIVATE_ACCOUNT: &str = "/activate-account";

pub const PATIENT_DASHBOARD: &str = "/dashboard/patient";
pub const DOCTOR_DASHBOARD: &str = "/pro/dashboard";
pub const ADMIN_DASHBOARD: &str = "/admin/dashboard";

/// Reserved for visitors without a session.
const PUBLIC_ONLY: &[&str] = &[LOGIN, REGISTER, PRO_LOGIN, PRO_REGISTER, ADMIN_LOGIN];

/// Reachable whatever the session state.
const OPEN: &[&str] = &[
    "/doctors",
    "/forgot-password",
    "/reset-password",
    ACTIVATE_ACCOUNT,
    "/payment",
];

const PRO_AREA: &str = "/pro";
const ADMIN_AREA: &str = "/admin";

/// Landing page after login, per role.
pub fn landing_for(role: UserRole) -> &'static str {
    match role {
        UserRole::Doctor => DOCTOR_DASHBOARD,
        UserRole::Admin => ADMIN_DASHBOARD,
        UserRole::Patient => PATIENT_DASHBOARD,
    }
}

/// Login page matching the area a location belongs to.
pub fn login_for(path: &str) -> &'static str {
    if within(path, PRO_AREA) {
        PRO_LOGIN
    } else if within(path, ADMIN_AREA) {
        ADMIN_LOGIN
    } else {
        LOGIN
    }
}

pub fn is_public_only(path: &str) -> bool {
    let path = path_of(path);
    PUBLIC_ONLY.iter().any(|prefix| within(path, prefix))
}

pub fn is_open(path: &str) -> bool {
    let path = path_of(path);
    path == HOME || OPEN.iter().any(|prefix| within(path, prefix))
}

/// Neither public-only nor open: a session is required.
pub fn is_protected(path: &str) -> bool {
    !is_public_only(path) && !is_open(path)
}

/// Role required to enter a location, if any.
pub fn required_role(path: &str) -> Option<UserRole> {
    let path = path_of(path);
    if is_public_only(path) {
        None
    } else if within(path, PRO_AREA) {
        Some(UserRole::Doctor)
    } else if within(path, ADMIN_AREA) {
        Some(UserRole::Admin)
    } else {
        None
    }
}

/// Activation page prefilled with an email address.
pub fn activation_location(email: &str) -> String {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("email", email)
        .finish();
    format!("{}?{}", ACTIVATE_ACCOUNT, query)
}

/// Strip the query string and fragment from a location.
pub fn path_of(location: &str) -> &str {
    let end = location.find(['?', '#']).unwrap_or(location.len());
    &location[..end]
}

/// `path` equals `prefix` or is nested below it.
fn within(path: &str, prefix: &str) -> bool {
    let path = path_of(path);
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
