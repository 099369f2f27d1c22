use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::AccountType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentType {
    DriversLicenseFront,
    DriversLicenseBack,
    BusinessRegistration,
}

/// An uploaded verification document. The file itself lives on disk under the
/// document store; `file_path` is relative to the store root.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub customer_id: String,
    pub document_type: DocumentType,
    pub file_name: String,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub file_size: i64,
    pub content_type: Option<String>,
    pub uploaded_at: i64,
}

/// Documents a customer must provide before their account can be verified,
/// keyed by account type.
pub fn required_document_types(account_type: AccountType) -> &'static [DocumentType] {
    match account_type {
        AccountType::Individual => &[
            DocumentType::DriversLicenseFront,
            DocumentType::DriversLicenseBack,
        ],
        AccountType::Business => &[DocumentType::BusinessRegistration],
    }
}

/// Required document types the customer has not uploaded yet.
pub fn missing_documents(
    account_type: AccountType,
    uploaded: &[Document],
) -> Vec<DocumentType> {
    required_document_types(account_type)
        .iter()
        .copied()
        .filter(|required| !uploaded.iter().any(|d| d.document_type == *required))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(document_type: DocumentType) -> Document {
        Document {
            id: "mp_doc_00000000000000000000000000000000".into(),
            customer_id: "mp_cus_00000000000000000000000000000000".into(),
            document_type,
            file_name: "scan.pdf".into(),
            file_path: "mp_cus_x/drivers_license_front/scan.pdf".into(),
            file_size: 1024,
            content_type: Some("application/pdf".into()),
            uploaded_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_required_sets_differ_by_account_type() {
        assert_eq!(required_document_types(AccountType::Individual).len(), 2);
        assert_eq!(
            required_document_types(AccountType::Business),
            &[DocumentType::BusinessRegistration]
        );
    }

    #[test]
    fn test_missing_documents() {
        let uploaded = vec![doc(DocumentType::DriversLicenseFront)];
        let missing = missing_documents(AccountType::Individual, &uploaded);
        assert_eq!(missing, vec![DocumentType::DriversLicenseBack]);

        let all = vec![
            doc(DocumentType::DriversLicenseFront),
            doc(DocumentType::DriversLicenseBack),
        ];
        assert!(missing_documents(AccountType::Individual, &all).is_empty());
    }

    #[test]
    fn test_wrong_type_documents_do_not_count() {
        let uploaded = vec![doc(DocumentType::BusinessRegistration)];
        let missing = missing_documents(AccountType::Individual, &uploaded);
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn test_type_string_round_trip() {
        assert_eq!(
            DocumentType::DriversLicenseFront.as_ref(),
            "drivers_license_front"
        );
        assert_eq!(
            "business_registration".parse::<DocumentType>().unwrap(),
            DocumentType::BusinessRegistration
        );
    }
}
