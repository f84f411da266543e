pub mod brevo;
pub mod logfile;
pub mod mailjet;
pub mod smtp;
pub mod twilio;
pub mod webhook;
