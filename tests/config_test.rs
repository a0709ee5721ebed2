//! Configuration loading from disk

use std::io::Write;

use tempfile::NamedTempFile;
use ticketbuyer::address::Address;
use ticketbuyer::config::Config;
use ticketbuyer::ticket_buyer::OwnershipStrategy;
use ticketbuyer::Amount;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let voting = Address::new([0x07, 0x3f], [0x5a; 20]);
    let file = write_config(&format!(
        r#"
        [node]
        url = "https://node.local:9109"
        user = "rpc"
        password = "secret"
        timeout_secs = 10

        [wallet]
        url = "https://wallet.local:9110"
        account = "voting"
        rate_limit_rps = 20

        [ticket_buyer]
        voting_address = "{}"
        max_per_block = 3
        max_fee = 0.05
        spend_limit = 250.0
        min_balance = 10.0
        price_average_window = 144

        [controller]
        max_attempts = 4
        retry_delay_ms = 1500

        [monitoring]
        enable_metrics = false
        "#,
        voting.encode()
    ));

    let config = Config::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.node.user.as_deref(), Some("rpc"));
    assert_eq!(config.node.endpoint().timeout.as_secs(), 10);
    assert_eq!(config.wallet.account, "voting");
    assert_eq!(config.wallet.rpc.endpoint().rate_limit_rps, 20);
    assert!(!config.monitoring.enable_metrics);

    let limits = config.purchase_config().unwrap();
    assert_eq!(limits.max_per_block, 3);
    assert_eq!(limits.max_fee, Amount(5_000_000));
    assert_eq!(limits.spend_limit, Amount(25_000_000_000));
    assert_eq!(limits.min_balance, Amount(1_000_000_000));
    assert_eq!(limits.price_average_window, 144);
    assert_eq!(limits.ownership_strategy(), OwnershipStrategy::AddressScan(voting));

    let settings = config.controller_settings();
    assert_eq!(settings.max_attempts, 4);
    assert_eq!(settings.retry_delay.as_millis(), 1500);
    assert_eq!(settings.stake_info_retry.attempts, 10);
}

#[test]
fn test_empty_file_is_all_defaults() {
    let file = write_config("");
    let config = Config::from_file(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(
        config.purchase_config().unwrap().ownership_strategy(),
        OwnershipStrategy::WalletNative
    );
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_config("[ticket_buyer]\nmax_per_block = \"many\"\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_negative_spend_limit_rejected() {
    let file = write_config("[ticket_buyer]\nspend_limit = -3.0\n");
    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}
