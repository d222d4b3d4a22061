//! Content-type detection for published objects.

/// Number of leading bytes inspected when classifying content
pub const SNIFF_LEN: usize = 261;

/// Result of classifying one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub content_type: String,
    pub is_ascii: bool,
}

impl Classification {
    pub fn is_image(&self) -> bool {
        self.content_type.contains("image/")
    }

    pub fn is_text(&self) -> bool {
        self.content_type.contains("text/")
    }

    pub fn is_audio(&self) -> bool {
        self.content_type.contains("audio/")
    }

    pub fn is_video(&self) -> bool {
        self.content_type.contains("video/")
    }
}

/// Pluggable detector fed the filename and the first decompressed bytes
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, filename: &str, head: &[u8]) -> Classification;
}

/// Extension lookup with an ASCII fallback
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl ContentClassifier for DefaultClassifier {
    fn classify(&self, filename: &str, head: &[u8]) -> Classification {
        let is_ascii = head.is_ascii();

        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        let content_type = match extension.as_deref() {
            Some("js") => "application/javascript".to_string(),
            Some("css") => "text/css".to_string(),
            _ => match mime_guess::from_path(filename).first() {
                Some(mime) => mime.essence_str().to_string(),
                None if is_ascii => "text/plain".to_string(),
                None => "application/octet-stream".to_string(),
            },
        };

        Classification {
            content_type,
            is_ascii,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        let c = DefaultClassifier.classify("photo.PNG", &[0x89, b'P', b'N', b'G']);
        assert_eq!(c.content_type, "image/png");
        assert!(c.is_image());
        assert!(!c.is_ascii);

        assert_eq!(DefaultClassifier.classify("app.js", b"x").content_type, "application/javascript");
        assert_eq!(DefaultClassifier.classify("site.css", b"x").content_type, "text/css");
        assert!(DefaultClassifier.classify("song.mp3", &[0xff]).is_audio());
        assert!(DefaultClassifier.classify("clip.mp4", &[0x00]).is_video());
    }

    #[test]
    fn unknown_extension_falls_back_on_bytes() {
        let text = DefaultClassifier.classify("notes", b"plain words\n");
        assert_eq!(text.content_type, "text/plain");
        assert!(text.is_text());
        assert!(text.is_ascii);

        let binary = DefaultClassifier.classify("blob.zzq", &[0x00, 0xfe, 0x80]);
        assert_eq!(binary.content_type, "application/octet-stream");
        assert!(!binary.is_text());
    }
}
