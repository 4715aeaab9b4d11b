pub mod admin;
pub mod config;
pub mod dashboard;
pub mod invite;
pub mod leaderboard;
pub mod login;
pub mod municipalities;
pub mod report;
pub mod reports;
