use error::Result;

pub fn string_to_u8_array(hex: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(hex)?)
}

pub fn u8_array_to_string(a: &[u8]) -> String {
    hex::encode(a)
}
