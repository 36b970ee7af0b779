pub mod feroxbuster;
pub mod hydra;
pub mod masscan;
pub mod metasploit;
pub mod nikto;
pub mod nmap;
pub mod nuclei;
pub mod sqlmap;
pub mod subfinder;
pub mod whatweb;

pub use feroxbuster::FeroxbusterRunner;
pub use hydra::HydraRunner;
pub use masscan::MasscanRunner;
pub use metasploit::MetasploitRunner;
pub use nikto::NiktoRunner;
pub use nmap::NmapRunner;
pub use nuclei::NucleiRunner;
pub use sqlmap::SqlmapRunner;
pub use subfinder::SubfinderRunner;
pub use whatweb::WhatwebRunner;

use serde::de::DeserializeOwned;

/// Decode every line of `output` that holds a JSON value of type `T`,
/// tolerating array brackets and trailing commas. Progress lines and other
/// noise are skipped.
pub(crate) fn json_lines<T: DeserializeOwned>(output: &str) -> Vec<T> {
    output
        .lines()
        .map(|l| l.trim().trim_end_matches(','))
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_json_lines_skips_noise() {
        let out = "[\n{\"a\": 1},\n[INF] progress\n{\"a\": 2}\n{broken\n]";
        let values: Vec<Value> = json_lines(out);
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["a"], 2);
    }
}
