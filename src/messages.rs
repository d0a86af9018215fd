//! Texts sent to the Telegram chats.

use chrono::{DateTime, Local};

pub const CHECKING: &str = "⏳ Checking internet connection...";

pub fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn lost(timestamp: &str) -> String {
    format!("⚠️ Internet connection lost!\nTime: {timestamp}")
}

pub fn restored(ssid: Option<&str>, timestamp: &str) -> String {
    format!(
        "✅ Internet connection restored!\nWiFi: {}\nTime: {timestamp}",
        ssid.unwrap_or("unknown")
    )
}

pub fn retrying_primary(primary: &str, timestamp: &str) -> String {
    format!("🔄 Attempting to switch to {primary}...\nTime: {timestamp}")
}

pub fn switched_to_primary(primary: &str, timestamp: &str) -> String {
    format!("✅ Successfully switched to {primary}!\nTime: {timestamp}")
}

pub fn primary_without_internet(primary: &str, fallback: &str, timestamp: &str) -> String {
    format!("⚠️ {primary} has no internet. Staying on {fallback}\nTime: {timestamp}")
}

pub fn connected(ssid: &str, timestamp: &str) -> String {
    format!("✅ Connected to {ssid}!\nTime: {timestamp}")
}

pub fn help() -> String {
    [
        "🤖 Internet Monitor Bot",
        "",
        "Available commands:",
        "/wifistatus - Show connection and WiFi status",
        "/help - Show this help message",
    ]
    .join("\n")
}

pub fn status(reachable: bool, ssid: Option<&str>, timestamp: &str) -> String {
    let (icon, internet) = if reachable {
        ("✅", "Connected")
    } else {
        ("❌", "Disconnected")
    };

    format!(
        "{icon} Connection Status\nInternet: {internet}\nWiFi: {}\nTime: {timestamp}",
        ssid.unwrap_or("Not connected")
    )
}
