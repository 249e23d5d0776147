//! Document rendition requests (`f=pdf`)

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::codec::TransformPlan;
use crate::engine::exchange::http_date;
use crate::engine::image::locate_source;
use crate::engine::task::RequestProcessor;
use crate::engine::{EngineError, Exchange, ProcessContext};

use super::Strategy;

pub struct PdfStrategy;

impl Strategy for PdfStrategy {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        exchange
            .params
            .format
            .as_ref()
            .is_some_and(|f| f.name == "pdf")
    }

    fn create(&self) -> Box<dyn RequestProcessor> {
        Box::new(DocumentProcessor)
    }
}

/// Document output needs a codec backend that can write it; without one the
/// rendition simply does not exist.
pub struct DocumentProcessor;

#[async_trait]
impl RequestProcessor for DocumentProcessor {
    fn kind(&self) -> &'static str {
        "pdf"
    }

    async fn execute(&mut self, ctx: &mut ProcessContext) -> Result<(), EngineError> {
        if ctx.exchange.method == Method::POST {
            return Err(EngineError::MethodNotAllowed(
                "POST is not supported for document requests".to_string(),
            ));
        }
        let services = Arc::clone(&ctx.services);
        if !services.codec.can_write("pdf") {
            return Err(EngineError::NotFound(
                "Document rendering is not available".to_string(),
            ));
        }

        let (data, _) = locate_source(&ctx.exchange, &services).await?;
        let info = services
            .codec
            .identify(&data)
            .ok_or_else(|| EngineError::UnsupportedMediaType("Unsupported source format".to_string()))?;
        let params = &ctx.exchange.params;
        let plan = TransformPlan {
            format: Some("pdf".to_string()),
            quality: params.quality,
            scale: params.scale.clone(),
            crop: params.crop.clone(),
            padding: params.padding,
            border: params.border,
        };
        let output = services.codec.transform(data, &info, &plan)?;

        let headers = BTreeMap::from([
            ("Content-Type".to_string(), output.content_type.to_string()),
            ("Content-Length".to_string(), output.bytes.len().to_string()),
            ("Date".to_string(), http_date(Utc::now())),
        ]);
        ctx.response.commit(StatusCode::OK, headers)?;
        ctx.response.complete(output.bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::codec::{EncodedImage, ImageCodec, ImageInfo, SniffCodec};
    use crate::engine::task::{Task, TaskOutcome};
    use crate::engine::{EngineServices, ResourceLimits};
    use crate::humanize::ByteSize;
    use crate::locator::{FileLocator, LocatorChain};
    use crate::params::Rgba;
    use axum::http::HeaderMap;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn exchange(method: Method, path: &str) -> Exchange {
        let mut ex = Exchange::new(
            method,
            "",
            path,
            BTreeMap::new(),
            HeaderMap::new(),
            None,
            None,
        );
        ex.prepare().unwrap();
        ex
    }

    fn services(codec: Arc<dyn ImageCodec>, root: Option<&std::path::Path>) -> Arc<EngineServices> {
        let locators = match root {
            Some(root) => {
                LocatorChain::new(vec![Arc::new(FileLocator::new(root, ByteSize::mib(2)))])
            }
            None => LocatorChain::default(),
        };
        Arc::new(EngineServices {
            locators,
            codec,
            limits: ResourceLimits {
                max_image_file_size: ByteSize::mib(2),
                max_image_resolution: 6_000_000,
            },
            default_max_age: 3600,
            remote_enabled: false,
        })
    }

    /// Wraps the sniffing codec and pretends it can also write documents
    struct DocumentCapable;

    impl ImageCodec for DocumentCapable {
        fn identify(&self, data: &[u8]) -> Option<ImageInfo> {
            SniffCodec.identify(data)
        }

        fn can_write(&self, format: &str) -> bool {
            format == "pdf" || SniffCodec.can_write(format)
        }

        fn transform(
            &self,
            _data: Bytes,
            info: &ImageInfo,
            plan: &TransformPlan,
        ) -> Result<EncodedImage, EngineError> {
            assert_eq!(plan.format.as_deref(), Some("pdf"));
            Ok(EncodedImage {
                bytes: Bytes::from_static(b"%PDF-1.7 rendered"),
                format: "pdf",
                content_type: "application/pdf",
                width: info.width,
                height: info.height,
            })
        }

        fn palette(&self, data: &[u8], info: &ImageInfo, max_colors: usize) -> Vec<Rgba> {
            SniffCodec.palette(data, info, max_colors)
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 2, 0, 0, 0]);
        data
    }

    #[test]
    fn test_matches_only_pdf_format() {
        let strategy = PdfStrategy;
        assert!(strategy.matches(&exchange(Method::GET, "/f=pdf/images/a.png")));
        assert!(!strategy.matches(&exchange(Method::GET, "/f=png/images/a.png")));
    }

    #[tokio::test]
    async fn test_rendition_does_not_exist_without_a_backend() {
        let ex = exchange(Method::GET, "/f=pdf/images/a.png");
        let mut task = Task::new(Box::new(DocumentProcessor));
        let mut ctx = ProcessContext::new(ex, services(Arc::new(SniffCodec), None));
        let TaskOutcome::Interrupted { status, .. } = task.run(&mut ctx).await.unwrap() else {
            panic!("expected an interruption");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_capable_backend_renders_the_document() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), png_bytes(64, 48)).unwrap();

        let ex = exchange(Method::GET, "/f=pdf/a.png");
        let mut task = Task::new(Box::new(DocumentProcessor));
        let mut ctx = ProcessContext::new(
            ex,
            services(Arc::new(DocumentCapable), Some(dir.path())),
        );
        let TaskOutcome::Completed(response) = task.run(&mut ctx).await.unwrap() else {
            panic!("expected a completed response");
        };
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("content-type"), Some("application/pdf"));
        assert_eq!(&response.body[..], b"%PDF-1.7 rendered");
    }
}
