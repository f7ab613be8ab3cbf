use crate::model::AuthToken;

/* `data` of a CrossLogin response is the token structure itself */
pub type CrossLogin = AuthToken;
