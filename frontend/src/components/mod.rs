mod header;
mod issue_filters;
mod notification_sidebar;

pub use header::Header;
pub use issue_filters::IssueFilterBar;
pub use notification_sidebar::NotificationSidebar;
