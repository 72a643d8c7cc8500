//! DICOM acquisition.
//!
//! Radiographs usually arrive as DICOM files with 12 or 16-bit, possibly
//! signed, stored values. The first frame goes through the same 8-bit
//! mapping as any other integer array, see [`RawImage::from_array`].

use std::path::Path;

use cxr_core::{AnalysisError, Result};
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject, InMemDicomObject};
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use serde::{Deserialize, Serialize};

use crate::raw_image::RawImage;

/// Patient and study attributes read next to the pixel data.
///
/// Missing or empty attributes are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DicomMetadata {
    /// Patient ID (0010,0020).
    pub patient_id: Option<String>,
    /// Patient name (0010,0010), in DICOM `Family^Given` form.
    pub patient_name: Option<String>,
    /// Patient age (0010,1010), e.g. `045Y`.
    pub patient_age: Option<String>,
    /// Patient sex (0010,0040).
    pub patient_sex: Option<String>,
    /// Study date (0008,0020), `YYYYMMDD`.
    pub study_date: Option<String>,
    /// Modality (0008,0060), e.g. `CR` or `DX`.
    pub modality: Option<String>,
}

impl DicomMetadata {
    /// Read the attributes from a data set.
    pub fn from_object(obj: &InMemDicomObject) -> Self {
        Self {
            patient_id: text(obj, tags::PATIENT_ID),
            patient_name: text(obj, tags::PATIENT_NAME),
            patient_age: text(obj, tags::PATIENT_AGE),
            patient_sex: text(obj, tags::PATIENT_SEX),
            study_date: text(obj, tags::STUDY_DATE),
            modality: text(obj, tags::MODALITY),
        }
    }

    /// `(name, value)` pairs with `Unknown` for missing attributes.
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        fn show(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("Unknown")
        }
        [
            ("PatientID", show(&self.patient_id)),
            ("PatientName", show(&self.patient_name)),
            ("PatientAge", show(&self.patient_age)),
            ("PatientSex", show(&self.patient_sex)),
            ("StudyDate", show(&self.study_date)),
            ("Modality", show(&self.modality)),
        ]
    }
}

fn text(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.get(tag)
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
        .filter(|value| !value.is_empty())
}

fn dicom_error(err: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::InvalidImageFormat(format!("DICOM: {err}"))
}

impl RawImage {
    /// Build an image from the first frame of a DICOM object.
    ///
    /// Stored values are used as is (no rescale slope/intercept and no VOI
    /// window), then mapped to 8 bits like any other integer array.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidImageFormat`] if the pixel data is missing,
    /// cannot be decoded or has an unsupported layout.
    pub fn from_dicom(obj: &DefaultDicomObject) -> Result<(Self, DicomMetadata)> {
        let decoded = obj.decode_pixel_data().map_err(dicom_error)?;
        let rows = decoded.rows() as usize;
        let columns = decoded.columns() as usize;
        let samples_per_pixel = decoded.samples_per_pixel() as usize;
        let frames = decoded.number_of_frames();
        if frames > 1 {
            tracing::debug!(frames, "Multi-frame DICOM, using the first frame");
        }

        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        let mut samples: Vec<i32> = decoded
            .to_vec_with_options(&options)
            .map_err(dicom_error)?;
        let frame_len = rows * columns * samples_per_pixel;
        if samples.len() < frame_len {
            return Err(AnalysisError::InvalidImageFormat(format!(
                "DICOM pixel data has {} samples, expected {frame_len}",
                samples.len()
            )));
        }
        samples.truncate(frame_len);

        let image = if samples_per_pixel == 1 {
            Self::from_raw(&[rows, columns], samples)?
        } else {
            Self::from_raw(&[rows, columns, samples_per_pixel], samples)?
        };
        Ok((image, DicomMetadata::from_object(obj)))
    }

    /// Open a DICOM file.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidImageFormat`] if the file cannot be parsed,
    /// plus the cases of [`Self::from_dicom`].
    pub fn open_dicom(path: impl AsRef<Path>) -> Result<(Self, DicomMetadata)> {
        let path = path.as_ref();
        let obj = open_file(path).map_err(dicom_error)?;
        let (image, metadata) = Self::from_dicom(&obj)?;
        tracing::debug!(
            path = %path.display(),
            shape = %image.shape(),
            modality = metadata.modality.as_deref().unwrap_or("Unknown"),
            "Read DICOM image"
        );
        Ok((image, metadata))
    }
}

/// Whether a path looks like a DICOM file (`.dcm` or `.dicom`).
pub fn is_dicom_path(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm") || ext.eq_ignore_ascii_case("dicom"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxr_core::ImageShape;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_object::FileMetaTableBuilder;

    const DX_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1.1";
    const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

    fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
        obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }

    fn put_u16(obj: &mut InMemDicomObject, tag: Tag, value: u16) {
        obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
    }

    /// Write a 16-bit MONOCHROME2 file with the given pixels.
    fn write_radiograph(path: &Path, rows: u16, columns: u16, pixels: Vec<u16>) {
        let mut obj = InMemDicomObject::new_empty();
        put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, DX_STORAGE);
        put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.4.5");
        put_str(&mut obj, tags::MODALITY, VR::CS, "DX");
        put_str(&mut obj, tags::STUDY_DATE, VR::DA, "20200315");
        put_str(&mut obj, tags::PATIENT_ID, VR::LO, "P-0042");
        put_str(&mut obj, tags::PATIENT_NAME, VR::PN, "Doe^Jane");
        put_str(&mut obj, tags::PATIENT_AGE, VR::AS, "045Y");
        put_str(&mut obj, tags::PATIENT_SEX, VR::CS, "F");
        put_str(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
        put_u16(&mut obj, tags::SAMPLES_PER_PIXEL, 1);
        put_u16(&mut obj, tags::ROWS, rows);
        put_u16(&mut obj, tags::COLUMNS, columns);
        put_u16(&mut obj, tags::BITS_ALLOCATED, 16);
        put_u16(&mut obj, tags::BITS_STORED, 16);
        put_u16(&mut obj, tags::HIGH_BIT, 15);
        put_u16(&mut obj, tags::PIXEL_REPRESENTATION, 0);
        obj.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(pixels.into()),
        ));

        let file = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(EXPLICIT_VR_LE)
                    .media_storage_sop_class_uid(DX_STORAGE)
                    .media_storage_sop_instance_uid("1.2.3.4.5"),
            )
            .unwrap();
        file.write_to_file(path).unwrap();
    }

    #[test]
    fn test_open_dicom_rescales_and_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chest.dcm");
        write_radiograph(&path, 2, 2, vec![0, 1020, 2040, 4080]);

        let (image, metadata) = RawImage::open_dicom(&path).unwrap();
        assert_eq!(image.shape(), ImageShape::new(2, 2, 1));
        let values: Vec<u8> = image.pixels().iter().copied().collect();
        assert_eq!(values, vec![0, 63, 127, 255]);

        assert_eq!(metadata.patient_id.as_deref(), Some("P-0042"));
        assert_eq!(metadata.patient_name.as_deref(), Some("Doe^Jane"));
        assert_eq!(metadata.patient_age.as_deref(), Some("045Y"));
        assert_eq!(metadata.patient_sex.as_deref(), Some("F"));
        assert_eq!(metadata.study_date.as_deref(), Some("20200315"));
        assert_eq!(metadata.modality.as_deref(), Some("DX"));
    }

    #[test]
    fn test_eight_bit_range_dicom_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.dcm");
        write_radiograph(&path, 1, 3, vec![5, 100, 250]);

        let (image, _) = RawImage::open_dicom(&path).unwrap();
        let values: Vec<u8> = image.pixels().iter().copied().collect();
        assert_eq!(values, vec![5, 100, 250]);
    }

    #[test]
    fn test_not_a_dicom_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.dcm");
        std::fs::write(&path, b"definitely not DICOM").unwrap();
        assert!(matches!(
            RawImage::open_dicom(&path),
            Err(AnalysisError::InvalidImageFormat(_))
        ));
    }

    #[test]
    fn test_metadata_entries_default_to_unknown() {
        let metadata = DicomMetadata {
            modality: Some("CR".to_string()),
            ..Default::default()
        };
        let entries = metadata.entries();
        assert_eq!(entries[0], ("PatientID", "Unknown"));
        assert_eq!(entries[5], ("Modality", "CR"));
    }

    #[test]
    fn test_is_dicom_path() {
        assert!(is_dicom_path("scan.dcm"));
        assert!(is_dicom_path("SCAN.DCM"));
        assert!(!is_dicom_path("scan.png"));
        assert!(!is_dicom_path("scan"));
    }
}
