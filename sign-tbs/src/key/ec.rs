use crate::oids;
use std::fmt;

/// Elliptic curve name to use for curve operations which require curve-specific arithmetic.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EcCurve {
    /// NIST P-256 curve (secp256r1)
    NistP256,
    /// NIST P-384 curve (secp384r1)
    NistP384,
}

impl EcCurve {
    /// Size of a field element in bytes, which is also the size of each half of a fixed width
    /// signature value.
    pub fn field_bytes_size(self) -> usize {
        match self {
            EcCurve::NistP256 => {
                use p256::elliptic_curve::generic_array::typenum::Unsigned;
                use p256::elliptic_curve::FieldBytesSize;
                <FieldBytesSize<p256::NistP256> as Unsigned>::USIZE
            }
            EcCurve::NistP384 => {
                use p384::elliptic_curve::generic_array::typenum::Unsigned;
                use p384::elliptic_curve::FieldBytesSize;
                <FieldBytesSize<p384::NistP384> as Unsigned>::USIZE
            }
        }
    }

    pub fn oid_str(self) -> &'static str {
        match self {
            EcCurve::NistP256 => oids::SECP256R1,
            EcCurve::NistP384 => oids::SECP384R1,
        }
    }

    pub fn from_oid_str(oid: &str) -> Option<Self> {
        match oid {
            oids::SECP256R1 => Some(EcCurve::NistP256),
            oids::SECP384R1 => Some(EcCurve::NistP384),
            _ => None,
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NistP256 => write!(f, "NIST-P256"),
            Self::NistP384 => write!(f, "NIST-P384"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_sizes() {
        assert_eq!(EcCurve::NistP256.field_bytes_size(), 32);
        assert_eq!(EcCurve::NistP384.field_bytes_size(), 48);
        assert_eq!(EcCurve::from_oid_str(oids::SECP384R1), Some(EcCurve::NistP384));
        assert_eq!(EcCurve::from_oid_str("1.3.132.0.35"), None);
    }
}
