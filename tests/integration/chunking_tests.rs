//! Chunk rollover and coordinate arithmetic across chunk files.

use stackstore::{ChunkStream, Dataset, PixelFormat, StorageError};
use tempfile::TempDir;

use super::test_utils::{plane, test_config, TEST_UID};

#[tokio::test]
async fn rollover_splits_five_five_two() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut config = test_config();
        config.chunk_size = 5;
        let mut ds = Dataset::create(&dir.path().join("stem"), &config, false)
            .await
            .unwrap();
        ds.set_shape(&[4, 3, 32, 32]).await.unwrap();
        ds.set_pixel_format(16, 1).await.unwrap();
        ds.set_uid(TEST_UID).await.unwrap();
        path = ds.path().to_path_buf();

        for i in 0..12u8 {
            ds.add_image(&plane(PixelFormat::GRAY16, 32, 32, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    // Exactly three chunk files with the expected names.
    let names = super::test_utils::chunk_files(&path);
    assert_eq!(
        names,
        vec!["stem.g2s.tif", "stem_1.g2s.tif", "stem_2.g2s.tif"]
    );

    // Each chunk holds exactly its share: 5, 5, 2.
    for (name, expected_index, expected_count) in [
        ("stem.g2s.tif", 0u32, 5usize),
        ("stem_1.g2s.tif", 1, 5),
        ("stem_2.g2s.tif", 2, 2),
    ] {
        let mut chunk = ChunkStream::open_existing(&path.join(name), false, None)
            .await
            .unwrap();
        chunk.parse().await.unwrap();
        assert_eq!(chunk.chunk_index(), expected_index, "{}", name);
        assert_eq!(chunk.image_count(), expected_count, "{}", name);
        assert_eq!(chunk.header().chunk_size, 5);
        assert_eq!(chunk.header().shape, vec![4, 3, 32, 32]);
    }

    // Load exposes all 12 images sequentially with intact bytes.
    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert_eq!(ds.image_count(), 12);
    for i in 0..12u8 {
        let pixels = ds.read_image(None).await.unwrap();
        assert!(pixels.iter().all(|&b| b == i), "image {}", i);
    }
}

#[tokio::test]
async fn rollover_preserves_identity_across_chunks() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut config = test_config();
        config.chunk_size = 2;
        let mut ds = Dataset::create(&dir.path().join("id"), &config, false)
            .await
            .unwrap();
        ds.set_shape(&[3, 2, 8, 8]).await.unwrap();
        ds.set_uid(TEST_UID).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..6u8 {
            ds.add_image(&plane(PixelFormat::GRAY8, 8, 8, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    // Every chunk of the dataset carries the same UUID raw bytes.
    let mut uuids = Vec::new();
    for name in super::test_utils::chunk_files(&path) {
        let chunk = ChunkStream::open_existing(&path.join(name), false, None)
            .await
            .unwrap();
        uuids.push(chunk.header().uuid);
    }
    assert_eq!(uuids.len(), 3);
    assert!(uuids.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn random_access_touches_chunks_lazily() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut config = test_config();
        config.chunk_size = 3;
        let mut ds = Dataset::create(&dir.path().join("lazy"), &config, false)
            .await
            .unwrap();
        ds.set_shape(&[4, 3, 8, 8]).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..12u8 {
            ds.add_image(&plane(PixelFormat::GRAY8, 8, 8, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    // Jump straight into the third chunk: image 7 lives in chunk 2 slot 1.
    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    let pixels = ds.read_image(Some(&[2, 1])).await.unwrap();
    assert!(pixels.iter().all(|&b| b == 7));

    // And back into the first.
    let pixels = ds.read_image(Some(&[0, 0])).await.unwrap();
    assert!(pixels.iter().all(|&b| b == 0));
}

#[tokio::test]
async fn leading_axis_overflow_preserved_on_load() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut ds = Dataset::create(&dir.path().join("ovf"), &test_config(), false)
            .await
            .unwrap();
        // Declared leading axis 2; 30 images make it effectively 5.
        ds.set_shape(&[2, 3, 2, 16, 16]).await.unwrap();
        ds.set_pixel_format(8, 1).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..30u8 {
            ds.add_image(&plane(PixelFormat::GRAY8, 16, 16, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert_eq!(ds.image_count(), 30);
    // 3*6 + 1*2 + 0 = 20
    let pixels = ds.read_image(Some(&[3, 1, 0])).await.unwrap();
    assert!(pixels.iter().all(|&b| b == 20));
}

#[tokio::test]
async fn overflow_with_chunking_composes() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut config = test_config();
        config.chunk_size = 4;
        let mut ds = Dataset::create(&dir.path().join("both"), &config, false)
            .await
            .unwrap();
        ds.set_shape(&[1, 3, 8, 8]).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..9u8 {
            ds.add_image(&plane(PixelFormat::GRAY8, 8, 8, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert_eq!(ds.image_count(), 9);
    // Index 7 = [2, 1]: second chunk (7 / 4 = 1), slot 3.
    let pixels = ds.read_image(Some(&[2, 1])).await.unwrap();
    assert!(pixels.iter().all(|&b| b == 7));
}

#[tokio::test]
async fn non_leading_coordinate_out_of_range_fails() {
    let dir = TempDir::new().unwrap();
    let path;
    {
        let mut ds = Dataset::create(&dir.path().join("rng"), &test_config(), false)
            .await
            .unwrap();
        ds.set_shape(&[2, 3, 8, 8]).await.unwrap();
        path = ds.path().to_path_buf();
        for i in 0..6u8 {
            ds.add_image(&plane(PixelFormat::GRAY8, 8, 8, i), None, None)
                .await
                .unwrap();
        }
        ds.close().await.unwrap();
    }

    let mut ds = Dataset::load(&path, &test_config()).await.unwrap();
    assert!(matches!(
        ds.read_image(Some(&[0, 3])).await,
        Err(StorageError::InvalidArgument(_))
    ));
    // Leading overflow past the stored count is NotFound, not a range error.
    assert!(matches!(
        ds.read_image(Some(&[5, 0])).await,
        Err(StorageError::NotFound(_))
    ));
}
