use crate::output::is_quiet;
use crate::ui::{Icons, Tone, theme};

pub fn header(text: &str) {
    if is_quiet() {
        return;
    }
    println!("{} {}", Icons::POLL, theme().paint(Tone::Header, text));
}

pub fn status(icon: &str, label: &str, value: &str) {
    if is_quiet() {
        return;
    }
    println!("{} {}: {}", icon, theme().paint(Tone::Dim, label), value);
}

pub fn success(label: &str) {
    if is_quiet() {
        return;
    }
    println!("{} {}", Icons::CHECK, theme().paint(Tone::Success, label));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, theme().paint(Tone::Error, label));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, theme().paint(Tone::Warn, label));
}

pub fn section(title: &str) {
    if is_quiet() {
        return;
    }
    println!();
    println!("━{}━", theme().paint(Tone::Header, title));
}
