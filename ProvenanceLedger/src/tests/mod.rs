
#[cfg(test)]
mod test_utils {
    use audit_models::ContentHash;
    use ethers::types::Address;
    use std::str::FromStr;

    pub fn get_test_signers() -> (Address, Address) {
        (
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap(), // owner
            Address::from_str("0x70997970C51812dc3A010C7d01b50e0d17dc79C8").unwrap(), // user1
        )
    }

    pub fn get_test_code_hashes() -> (ContentHash, ContentHash) {
        (
            ContentHash::of("contract A {}"),
            ContentHash::of("contract B {}"),
        )
    }

    pub fn get_test_locators() -> (&'static str, &'static str) {
        ("QmABC123...xyz", "QmXYZ456...abc")
    }
}
