pub mod action;
pub mod energy;
pub mod validator;
