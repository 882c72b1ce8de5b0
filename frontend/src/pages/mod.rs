pub mod home;
pub mod issue_detail;
pub mod issue_form;
pub mod login;
pub mod machines;
pub mod manage_locations;
pub mod report;
