//! The signed-in context, passed to controllers explicitly rather than read
//! from ambient state.

use serde::{Deserialize, Serialize};

use crate::models::User;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub account_id: String,
    pub user: User,
}

impl Session {
    pub fn for_user(user: User) -> Self {
        Self {
            account_id: user.account_id.clone(),
            user,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}
