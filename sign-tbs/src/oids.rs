//! Object identifiers used by CMS signed attributes, digest and signature algorithms.

macro_rules! define_oid {
    ($uppercase:ident => $lowercase:ident => $str_value:literal) => {
        pub const $uppercase: &str = $str_value;

        pub fn $lowercase() -> oid::ObjectIdentifier {
            static OID: std::sync::OnceLock<oid::ObjectIdentifier> = std::sync::OnceLock::new();
            OID.get_or_init(|| oid::ObjectIdentifier::try_from($uppercase).expect("hardcoded OID is valid"))
                .clone()
        }
    };
    ( $( $uppercase:ident => $lowercase:ident => $str_value:literal, )+ ) => {
        $( define_oid! { $uppercase => $lowercase => $str_value } )+
    };
}

define_oid! {
    // ANSI-X962
    EC_PUBLIC_KEY => ec_public_key => "1.2.840.10045.2.1",
    SECP256R1 => secp256r1 => "1.2.840.10045.3.1.7",
    ECDSA_WITH_SHA1 => ecdsa_with_sha1 => "1.2.840.10045.4.1",
    ECDSA_WITH_SHA224 => ecdsa_with_sha224 => "1.2.840.10045.4.3.1",
    ECDSA_WITH_SHA256 => ecdsa_with_sha256 => "1.2.840.10045.4.3.2",
    ECDSA_WITH_SHA384 => ecdsa_with_sha384 => "1.2.840.10045.4.3.3",
    ECDSA_WITH_SHA512 => ecdsa_with_sha512 => "1.2.840.10045.4.3.4",

    // Certicom Object Identifiers
    SECP384R1 => secp384r1 => "1.3.132.0.34",

    // RSADSI
    RSA_ENCRYPTION => rsa_encryption => "1.2.840.113549.1.1.1",
    SHA1_WITH_RSA_ENCRYPTION => sha1_with_rsa_encryption => "1.2.840.113549.1.1.5",
    SHA256_WITH_RSA_ENCRYPTION => sha256_with_rsa_encryption => "1.2.840.113549.1.1.11",
    SHA384_WITH_RSA_ENCRYPTION => sha384_with_rsa_encryption => "1.2.840.113549.1.1.12",
    SHA512_WITH_RSA_ENCRYPTION => sha512_with_rsa_encryption => "1.2.840.113549.1.1.13",
    SHA224_WITH_RSA_ENCRYPTION => sha224_with_rsa_encryption => "1.2.840.113549.1.1.14",

    // PKCS#7 content types
    PKCS7_DATA => pkcs7_data => "1.2.840.113549.1.7.1",

    // PKCS#9 / CMS signed attributes
    CONTENT_TYPE => content_type => "1.2.840.113549.1.9.3",
    MESSAGE_DIGEST => message_digest => "1.2.840.113549.1.9.4",
    SIGNING_TIME => signing_time => "1.2.840.113549.1.9.5",
    CMS_ALGORITHM_PROTECTION => cms_algorithm_protection => "1.2.840.113549.1.9.52",

    // S/MIME authenticated attributes (RFC 2634, RFC 5035)
    SIGNING_CERTIFICATE => signing_certificate => "1.2.840.113549.1.9.16.2.12",
    SIGNING_CERTIFICATE_V2 => signing_certificate_v2 => "1.2.840.113549.1.9.16.2.47",

    // OIW
    SHA1 => sha1 => "1.3.14.3.2.26",

    // NIST hash algorithms
    SHA256 => sha256 => "2.16.840.1.101.3.4.2.1",
    SHA384 => sha384 => "2.16.840.1.101.3.4.2.2",
    SHA512 => sha512 => "2.16.840.1.101.3.4.2.3",
    SHA224 => sha224 => "2.16.840.1.101.3.4.2.4",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_function_matches_constant() {
        let oid: String = signing_certificate_v2().into();
        assert_eq!(oid, SIGNING_CERTIFICATE_V2);
        assert_eq!(sha256(), sha256());
    }
}
