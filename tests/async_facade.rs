//! Async facade over a scripted backend

mod support;

use support::{solid_frame, MockBackend, MockPage, CONFIG};
use webfilter::async_api::AsyncFrameFilter;
use webfilter::{Error, PixelFormat};

const GREY: [u8; 4] = [0x55, 0x55, 0x55, 0xFF];

#[tokio::test]
async fn frames_round_trip_through_the_worker() {
    let (factory, _log) = MockBackend::factory(MockPage::default());
    let filter = AsyncFrameFilter::new(CONFIG.to_string(), PixelFormat::Rgba, factory)
        .await
        .unwrap();

    let first = filter
        .submit_frame(solid_frame(2, 2, GREY), 2, 2, 0.0)
        .await
        .unwrap();
    assert_eq!(first, solid_frame(2, 2, [255, 0, 0, 255]));

    let second = filter
        .submit_frame(solid_frame(2, 2, GREY), 2, 2, 16.0)
        .await
        .unwrap();
    assert_eq!(second, solid_frame(2, 2, GREY));

    filter.clone().close().await.unwrap();
    let res = filter.submit_frame(solid_frame(1, 1, GREY), 1, 1, 32.0).await;
    assert!(matches!(res, Err(Error::Closed(_))), "{:?}", res);
}

#[tokio::test]
async fn geometry_errors_come_back_to_the_caller() {
    let (factory, _log) = MockBackend::factory(MockPage::default());
    let filter = AsyncFrameFilter::new(CONFIG.to_string(), PixelFormat::Bgra, factory)
        .await
        .unwrap();
    let res = filter.submit_frame(vec![0u8; 7], 2, 1, 0.0).await;
    assert!(matches!(res, Err(Error::GeometryError(_))), "{:?}", res);
    filter.close().await.unwrap();
}

#[tokio::test]
async fn bad_config_fails_creation() {
    let (factory, _log) = MockBackend::factory(MockPage::default());
    let res = AsyncFrameFilter::new("nonsense".to_string(), PixelFormat::Rgba, factory).await;
    assert!(matches!(res, Err(Error::ConfigError(_))));
}
