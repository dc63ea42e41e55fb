use std::fs;
use std::path::Path;

const WIFI_CONFIG: &str = "wifi_config.h";

// Pull a `#define NAME "value"` out of a C header
fn define_value<'a>(contents: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("#define {}", name);
    contents
        .lines()
        .find(|l| l.trim_start().starts_with(&needle))
        .and_then(|l| l.split('"').nth(1))
}

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");
    println!("cargo:rerun-if-changed={}", WIFI_CONFIG);

    // WiFi credentials are compiled in as the fallback when NVS holds none
    let (ssid, password) = if Path::new(WIFI_CONFIG).exists() {
        let contents = fs::read_to_string(WIFI_CONFIG)?;
        (
            define_value(&contents, "WIFI_SSID").unwrap_or_default().to_string(),
            define_value(&contents, "WIFI_PASSWORD").unwrap_or_default().to_string(),
        )
    } else {
        println!("cargo:warning=wifi_config.h not found! Copy wifi_config.h.example to wifi_config.h and add your credentials.");
        (String::new(), String::new())
    };

    println!("cargo:rustc-env=WIFI_SSID={}", ssid);
    println!("cargo:rustc-env=WIFI_PASSWORD={}", password);

    Ok(())
}
