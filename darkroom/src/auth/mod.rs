//! Authentication: bearer API key (and optional trusted-proxy header)
//! resolution into [`crate::api::models::users::CurrentUser`].

pub mod current_user;
