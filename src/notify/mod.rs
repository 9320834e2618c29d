mod twilio;

pub use twilio::TwilioSms;
