//! Create -> append -> close -> load round-trips.

use stackstore::{Dataset, PixelFormat, StorageError};
use tempfile::TempDir;

use super::test_utils::{coord_of, image_meta, plane, test_config, TEST_UID};

const SHAPE: [u32; 4] = [4, 3, 32, 32];

/// Write the twelve-image reference dataset and return its directory.
async fn write_reference(dir: &TempDir) -> std::path::PathBuf {
    let mut ds = Dataset::create(&dir.path().join("ref"), &test_config(), false)
        .await
        .unwrap();
    ds.set_shape(&SHAPE).await.unwrap();
    ds.set_pixel_format(16, 1).await.unwrap();
    ds.set_uid(TEST_UID).await.unwrap();

    for i in 0..12usize {
        let pixels = plane(PixelFormat::GRAY16, 32, 32, i as u8);
        let index = ds
            .add_image(&pixels, Some(&image_meta(i)), None)
            .await
            .unwrap();
        assert_eq!(index, i as u64);
    }
    ds.set_summary_metadata(&b"{\"experiment\":\"ref\"}"[..])
        .unwrap();
    let path = ds.path().to_path_buf();
    ds.close().await.unwrap();
    path
}

#[tokio::test]
async fn roundtrip_pixels_metadata_and_identity() {
    let dir = TempDir::new().unwrap();
    let path = write_reference(&dir).await;

    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert_eq!(ds.shape(), &SHAPE);
    assert_eq!(ds.uuid_string().unwrap(), TEST_UID);
    assert_eq!(ds.pixel_format(), PixelFormat::GRAY16);
    assert_eq!(ds.image_count(), 12);
    assert!(!ds.is_partial());
    assert_eq!(&ds.summary_metadata()[..], b"{\"experiment\":\"ref\"}");

    for i in 0..12u64 {
        let coord = coord_of(i, &SHAPE);
        let pixels = ds.read_image(Some(&coord)).await.unwrap();
        assert_eq!(pixels.len(), 32 * 32 * 2);
        assert!(pixels.iter().all(|&b| b == i as u8), "image {} bytes", i);

        let meta = ds.read_image_metadata(Some(&coord)).await.unwrap();
        assert_eq!(meta, image_meta(i as usize));
    }
}

#[tokio::test]
async fn roundtrip_without_metadata_or_summary() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut ds = Dataset::create(&dir.path().join("bare"), &test_config(), false)
            .await
            .unwrap();
        ds.set_shape(&[2, 16, 16]).await.unwrap();
        ds.set_pixel_format(8, 1).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..2u8 {
            ds.add_image(&plane(PixelFormat::GRAY8, 16, 16, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert_eq!(ds.image_count(), 2);
    assert!(ds.summary_metadata().is_empty());
    assert_eq!(ds.read_image_metadata(Some(&[1])).await.unwrap(), "");
    let pixels = ds.read_image(Some(&[1])).await.unwrap();
    assert!(pixels.iter().all(|&b| b == 1));
}

#[tokio::test]
async fn roundtrip_multi_sample_pixels() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut ds = Dataset::create(&dir.path().join("rgb"), &test_config(), false)
            .await
            .unwrap();
        ds.set_shape(&[2, 8, 8]).await.unwrap();
        ds.set_pixel_format(8, 3).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..2u8 {
            ds.add_image(&plane(PixelFormat::RGB24, 8, 8, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    let ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert_eq!(ds.pixel_format(), PixelFormat::RGB24);
    assert_eq!(ds.image_count(), 2);
}

#[tokio::test]
async fn close_is_idempotent_and_freezes_writes() {
    let dir = TempDir::new().unwrap();
    let mut ds = Dataset::create(&dir.path().join("x"), &test_config(), false)
        .await
        .unwrap();
    ds.set_shape(&[2, 8, 8]).await.unwrap();
    ds.add_image(&plane(PixelFormat::GRAY8, 8, 8, 1), None, None)
        .await
        .unwrap();

    ds.close().await.unwrap();
    ds.close().await.unwrap();

    assert!(matches!(
        ds.add_image(&plane(PixelFormat::GRAY8, 8, 8, 2), None, None)
            .await,
        Err(StorageError::InvalidState(_))
    ));
}

#[tokio::test]
async fn axis_sidecar_roundtrip_and_idempotence() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut ds = Dataset::create(&dir.path().join("axes"), &test_config(), false)
            .await
            .unwrap();
        ds.set_shape(&[2, 3, 8, 8]).await.unwrap();
        path = ds.path().to_path_buf();

        ds.configure_dimension(0, "T", "Time point").unwrap();
        ds.configure_dimension(1, "C", "Image channel").unwrap();
        ds.configure_dimension(2, "Y", "Image height").unwrap();
        ds.configure_dimension(3, "X", "Image width").unwrap();
        ds.configure_coordinate(0, 0, "T0").unwrap();
        ds.configure_coordinate(0, 1, "T1").unwrap();
        ds.configure_coordinate(1, 2, "GFP").unwrap();
        // Re-applying the same configuration must not change the outcome.
        ds.configure_dimension(1, "C", "Image channel").unwrap();
        ds.configure_coordinate(1, 2, "GFP").unwrap();

        ds.close().await.unwrap();
    }

    let sidecar = std::fs::read_to_string(path.join("axisinfo.txt")).unwrap();
    assert!(sidecar.contains("T0"));

    let ds = Dataset::load(&path, &test_config()).await.unwrap();
    let info = ds.axis_info();
    assert_eq!(info.axis(0).unwrap().name, "T");
    assert_eq!(info.axis(1).unwrap().description, "Image channel");
    assert_eq!(info.coordinate(0, 1).unwrap(), "T1");
    assert_eq!(info.coordinate(1, 2).unwrap(), "GFP");
    // Unlabeled slots read back empty
    assert_eq!(info.coordinate(1, 0).unwrap(), "");
}

#[tokio::test]
async fn classic_tiff_container_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut config = test_config();
        config.big_tiff = false;
        let mut ds = Dataset::create(&dir.path().join("classic"), &config, false)
            .await
            .unwrap();
        ds.set_shape(&[3, 16, 16]).await.unwrap();
        ds.set_pixel_format(16, 1).await.unwrap();
        ds.set_uid(TEST_UID).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..3usize {
            ds.add_image(
                &plane(PixelFormat::GRAY16, 16, 16, i as u8),
                Some(&image_meta(i)),
                None,
            )
            .await
            .unwrap();
        }
        ds.set_summary_metadata(&b"classic"[..]).unwrap();
        ds.close().await.unwrap();
    }

    // The container variant is detected from the file, not the config.
    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert_eq!(ds.image_count(), 3);
    assert_eq!(ds.uuid_string().unwrap(), TEST_UID);
    assert_eq!(&ds.summary_metadata()[..], b"classic");
    for i in 0..3u64 {
        let pixels = ds.read_image(Some(&[i as u32])).await.unwrap();
        assert!(pixels.iter().all(|&b| b == i as u8));
        assert_eq!(
            ds.read_image_metadata(Some(&[i as u32])).await.unwrap(),
            image_meta(i as usize)
        );
    }

    // Classic magic on disk: II, version 42.
    let bytes = std::fs::read(path.join("classic.g2s.tif")).unwrap();
    assert_eq!(&bytes[0..2], b"II");
    assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 42);
}

#[tokio::test]
async fn unsupported_pixel_formats_rejected() {
    let dir = TempDir::new().unwrap();
    let mut ds = Dataset::create(&dir.path().join("bad"), &test_config(), false)
        .await
        .unwrap();
    assert!(matches!(
        ds.set_pixel_format(32, 1).await,
        Err(StorageError::Unsupported(_))
    ));
    assert!(matches!(
        ds.set_pixel_format(16, 5).await,
        Err(StorageError::Unsupported(_))
    ));
}
