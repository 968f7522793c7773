//! User-facing notifications raised by the wallet service.
//!
//! The service never prints.  A front end hands it a [`Notifier`]; without
//! one, messages only reach the log.

/// Receives messages meant for the person operating the wallet.
pub trait Notifier {
    fn notify_error(&self, title: &str, message: &str);
    fn notify_warn(&self, title: &str, message: &str);
    fn notify_info(&self, title: &str, message: &str);
}

/// A [`Notifier`] that forwards everything to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_error(&self, title: &str, message: &str) {
        log::error!("{title}: {message}");
    }

    fn notify_warn(&self, title: &str, message: &str) {
        log::warn!("{title}: {message}");
    }

    fn notify_info(&self, title: &str, message: &str) {
        log::info!("{title}: {message}");
    }
}
