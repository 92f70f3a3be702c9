use serde::{Deserialize, Serialize};

/// The identity attached to the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// Unique user identifier issued by the auth provider.
    pub uid: String,
    /// Sign-in email (the student id for end users).
    pub email: String,
}

impl SessionUser {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
        }
    }

    /// Store path of one of this user's private sub-collections.
    pub fn collection_path(&self, sub_collection: &str) -> String {
        format!("users/{}/{}", self.uid, sub_collection)
    }
}
