//! Test data shared between the sign-tbs crates.

// openssl genpkey -algorithm RSA -pkeyopt rsa_keygen_bits:2048 -out rsa-2048-pk_1.key
pub const RSA_2048_PK_1: &str = include_str!("../test_assets/private_keys/rsa-2048-pk_1.key");
pub const RSA_2048_PK_1_PUB: &str = include_str!("../test_assets/public_keys/rsa-2048-pk_1.key");

// openssl genpkey -algorithm EC -pkeyopt ec_paramgen_curve:P-256 -out ec-nist256-pk_1.key
// openssl pkey -in ec-nist256-pk_1.key -pubout -out ec-nist256-pk_1.key
pub const EC_NIST256_PK_1: &str = include_str!("../test_assets/private_keys/ec-nist256-pk_1.key");
pub const EC_NIST256_PK_1_PUB: &str = include_str!("../test_assets/public_keys/ec-nist256-pk_1.key");

// openssl genpkey -algorithm EC -pkeyopt ec_paramgen_curve:P-384 -out ec-nist384-pk_1.key
pub const EC_NIST384_PK_1: &str = include_str!("../test_assets/private_keys/ec-nist384-pk_1.key");
pub const EC_NIST384_PK_1_PUB: &str = include_str!("../test_assets/public_keys/ec-nist384-pk_1.key");

// openssl req -new -x509 -key rsa-2048-pk_1.key -subj "/C=SE/O=Sign TBS Test/CN=RSA Signer" \
//     -days 3650 -set_serial 0x1a2b3c4d5e -sha256
pub const RSA_2048_SIGNER_CERT: &str = include_str!("../test_assets/certificates/rsa-2048-signer.crt");

// serial 0x0badc0ffee
pub const EC_NIST256_SIGNER_CERT: &str = include_str!("../test_assets/certificates/ec-nist256-signer.crt");

// serial 4242
pub const EC_NIST384_SIGNER_CERT: &str = include_str!("../test_assets/certificates/ec-nist384-signer.crt");
