use std::path::Path;

use mockall::mock;
use rstest::fixture;

mock! {
    pub AxmlDecoder {}

    impl crate::axml::AxmlDecoder for AxmlDecoder {
        fn decode(&self, apk: &Path, output: &Path) -> crate::Result<()>;
    }
}

#[fixture]
pub fn mock_axml_decoder() -> MockAxmlDecoder {
    MockAxmlDecoder::new()
}
