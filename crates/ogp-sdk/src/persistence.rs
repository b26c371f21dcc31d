use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ogp_binary::{ByteCodec, SharedTypeHandler, TypeDictionary};
use ogp_legacy::{LegacyTypeHandlerCreator, LegacyTypeMapper, NameMemberMatcher, TranslatorProvider};
use ogp_loader::Loader;
use ogp_registry::{ObjectManager, TypeHandlerRegistry};
use ogp_storage::{FileStorage, InMemoryStorage, StorageSource, StorageTarget};
use ogp_storer::Storer;
use ogp_types::{type_name_of, Instance, ObjectId, PersistenceError};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::{SdkError, SdkResult};
use crate::roots::{PersistentRoots, RootsHandler, ROOTS_TYPE_NAME};

/// File the type dictionary of a file storage is kept in.
pub const TYPE_DICTIONARY_FILE: &str = "types.json";

/// One object manager, one handler registry and one storage, with the
/// persistent roots on top.
pub struct Persistence<C: ByteCodec> {
    config: PersistenceConfig,
    manager: Arc<ObjectManager>,
    handlers: Arc<TypeHandlerRegistry<C>>,
    target: Arc<dyn StorageTarget>,
    source: Arc<dyn StorageSource>,
    roots: Mutex<Arc<PersistentRoots>>,
    translators: TranslatorProvider,
    dictionary_path: Option<PathBuf>,
}

impl<C: ByteCodec> Persistence<C> {
    /// Open the storage `config` names: file storage when it has a storage
    /// section, in-memory storage otherwise.
    pub fn open(config: PersistenceConfig) -> SdkResult<Self> {
        match config.file_storage_config() {
            Some((directory, storage_config)) => {
                let storage = Arc::new(FileStorage::<C>::open(&directory, storage_config)?);
                let mut persistence = Self::with_storage(config, storage)?;
                persistence.dictionary_path = Some(directory.join(TYPE_DICTIONARY_FILE));
                Ok(persistence)
            }
            None => Self::in_memory(config),
        }
    }

    pub fn in_memory(config: PersistenceConfig) -> SdkResult<Self> {
        Self::with_storage(config, Arc::new(InMemoryStorage::<C>::new()))
    }

    /// Use an already opened storage.
    pub fn with_storage<S>(config: PersistenceConfig, storage: Arc<S>) -> SdkResult<Self>
    where
        S: StorageTarget + StorageSource + 'static,
    {
        config.validate()?;
        let order = C::ORDER;
        if config.byte_order != order {
            return Err(SdkError::Configuration(format!(
                "configured byte order {} does not match the {order} codec",
                config.byte_order
            )));
        }
        let handlers = TypeHandlerRegistry::<C>::with_builtins()?;
        handlers.register(Arc::new(RootsHandler::new()))?;
        let manager = Arc::new(ObjectManager::new());
        manager.ensure_object_id_above(storage.highest_object_id()?);
        debug!(byte_order = %order, channels = config.channel_count, "persistence ready");
        Ok(Self {
            config,
            manager,
            handlers: Arc::new(handlers),
            target: storage.clone(),
            source: storage,
            roots: Mutex::new(Arc::new(PersistentRoots::new())),
            translators: TranslatorProvider::new(),
            dictionary_path: None,
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ObjectManager> {
        &self.manager
    }

    pub fn handlers(&self) -> &Arc<TypeHandlerRegistry<C>> {
        &self.handlers
    }

    pub fn register_handler(&self, handler: SharedTypeHandler<C>) -> SdkResult<()> {
        Ok(self.handlers.register(handler)?)
    }

    /// Custom translators used by later legacy mappings.
    pub fn translators_mut(&mut self) -> &mut TranslatorProvider {
        &mut self.translators
    }

    /// A new storing session.
    pub fn storer(&self) -> SdkResult<Arc<Storer<C>>> {
        Ok(Storer::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.handlers),
            Arc::clone(&self.target),
            self.config.storer_config(),
        )?)
    }

    pub fn loader(&self) -> Loader<C> {
        Loader::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.handlers),
            Arc::clone(&self.source),
            self.config.loader_config(),
        )
    }

    /// Store `instance` and what it reaches in one committed session.
    pub fn store(&self, instance: &Instance) -> SdkResult<ObjectId> {
        let storer = self.storer()?;
        let oid = storer.store(instance)?;
        storer.commit()?;
        self.save_type_dictionary()?;
        Ok(oid)
    }

    /// Load the instance stored under `oid`.
    pub fn load(&self, oid: ObjectId) -> SdkResult<Option<Instance>> {
        Ok(self.loader().get_object(oid)?)
    }

    // ---- roots ----

    pub fn roots(&self) -> Arc<PersistentRoots> {
        Arc::clone(&self.roots.lock().expect("roots handle lock poisoned"))
    }

    pub fn set_root(&self, identifier: impl Into<String>, instance: Instance) {
        self.roots().set(identifier, Some(instance));
    }

    pub fn root(&self, identifier: &str) -> SdkResult<Instance> {
        self.roots()
            .get(identifier)
            .ok_or_else(|| SdkError::RootNotFound(identifier.to_string()))
    }

    /// Store the roots entity and everything reachable from it.
    pub fn store_roots(&self) -> SdkResult<ObjectId> {
        let roots: Instance = self.roots();
        let oid = self.store(&roots)?;
        info!(%oid, "stored roots");
        Ok(oid)
    }

    /// Load the latest roots entity of the storage and adopt it. An empty
    /// storage leaves the current roots in place.
    pub fn load_roots(&self) -> SdkResult<Arc<PersistentRoots>> {
        let Some(instance) = self.loader().get()? else {
            return Ok(self.roots());
        };
        let actual = type_name_of(&instance);
        let roots = instance.downcast::<PersistentRoots>().map_err(|_| PersistenceError::TypeMismatch {
            oid: ObjectId::NULL,
            expected: ROOTS_TYPE_NAME.to_string(),
            actual,
        })?;
        *self.roots.lock().expect("roots handle lock poisoned") = Arc::clone(&roots);
        info!(roots = roots.len(), "loaded roots");
        Ok(roots)
    }

    // ---- type dictionary ----

    /// The dictionary persisted next to a file storage, if there is one.
    pub fn load_type_dictionary(&self) -> SdkResult<Option<TypeDictionary>> {
        match &self.dictionary_path {
            Some(path) if path.exists() => Ok(Some(TypeDictionary::load(path)?)),
            _ => Ok(None),
        }
    }

    /// Merge every registered description into the persisted dictionary.
    /// A no-op for storages without a dictionary file.
    pub fn save_type_dictionary(&self) -> SdkResult<()> {
        let Some(path) = &self.dictionary_path else {
            return Ok(());
        };
        let mut dictionary = self.load_type_dictionary()?.unwrap_or_default();
        let before = dictionary.len();
        for description in self.handlers.descriptions() {
            dictionary.register(description)?;
        }
        if dictionary.len() != before || !path.exists() {
            dictionary.save(path)?;
            debug!(types = dictionary.len(), path = %path.display(), "saved type dictionary");
        }
        Ok(())
    }

    /// Install legacy handlers for the outdated layouts in `dictionary`.
    pub fn install_legacy_types(&self, dictionary: &TypeDictionary) -> SdkResult<usize> {
        let creator = LegacyTypeHandlerCreator::new(
            NameMemberMatcher::new(self.config.renames.iter().cloned()),
            self.translators.clone(),
        );
        Ok(LegacyTypeMapper::new(creator).install(dictionary, &self.handlers)?)
    }

    /// Install legacy handlers for the persisted dictionary. Call after every
    /// current handler is registered.
    pub fn map_persisted_types(&self) -> SdkResult<usize> {
        match self.load_type_dictionary()? {
            Some(dictionary) => self.install_legacy_types(&dictionary),
            None => Ok(0),
        }
    }

    /// Prune registry entries of dropped instances.
    pub fn cleanup(&self) -> usize {
        self.manager.cleanup()
    }
}
