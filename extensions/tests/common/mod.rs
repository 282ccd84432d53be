use std::env;

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

// Helper function to get API key or skip test
pub fn get_api_key_or_skip(var_name: &str, test_name: &str) -> Option<String> {
    dotenv::dotenv().ok(); // Load .env file if present

    match env::var(var_name) {
        Ok(key) if !key.is_empty() => Some(key),
        _ => {
            println!("Skipping integration test {} - {} environment variable not set.", test_name, var_name);
            None
        }
    }
}
